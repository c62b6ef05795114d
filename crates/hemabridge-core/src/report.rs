//! PDF rendering of stored analyses.
//!
//! Two documents, both A4 with built-in Helvetica:
//!
//! - [`render_detailed`]: patient block, then per analysis the date, the
//!   cell-type table, a bar chart, the risk assessment, recommendations and
//!   any doctor's note.
//! - [`render_summary`]: one trend row per analysis in date order plus a
//!   line chart of the two triage signals.
//!
//! Content flows top to bottom; a new page is started whenever the next block
//! would cross the bottom margin.

use std::io::BufWriter;

use chrono::{DateTime, Utc};
use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Polygon, Rgb,
};
use thiserror::Error;

use crate::cell::CellType;
use crate::store::Analysis;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LEFT: f32 = 20.0;
const TOP: f32 = 277.0;
const BOTTOM_MARGIN: f32 = 20.0;
const CHART_HEIGHT: f32 = 40.0;
const CHART_WIDTH: f32 = 150.0;
const LAYER: &str = "Layer 1";

/// Errors from PDF rendering.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The PDF library failed.
    #[error("failed to render report: {message}")]
    Render {
        /// Underlying error text.
        message: String,
    },
}

impl ReportError {
    fn render(error: impl std::fmt::Display) -> Self {
        Self::Render {
            message: error.to_string(),
        }
    }
}

/// Identity block printed at the top of every report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientInfo {
    /// User id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
}

/// Title-cases a cell label: `segmented_neutrophil` becomes
/// `Segmented Neutrophil`.
#[must_use]
pub fn title_case(label: &str) -> String {
    label
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn rgb(r: f32, g: f32, b: f32) -> Color {
    Color::Rgb(Rgb::new(r, g, b, None))
}

fn point(x: f32, y: f32) -> (Point, bool) {
    (Point::new(Mm(x), Mm(y)), false)
}

/// Flowing writer over a growing document.
struct Writer {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl Writer {
    fn new(title: &str) -> Result<Self, ReportError> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), LAYER);
        let layer = doc.get_page(page).get_layer(layer);
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(ReportError::render)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(ReportError::render)?;
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: TOP,
            pages: 1,
        })
    }

    /// Starts a new page unless `needed` millimetres fit above the margin.
    fn reserve(&mut self, needed: f32) {
        if self.y - needed < BOTTOM_MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), LAYER);
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
            self.pages += 1;
        }
    }

    fn text(&mut self, text: &str, size: f32, x: f32, bold: bool) {
        let line_height = size * 0.5;
        self.reserve(line_height);
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
        self.y -= line_height;
    }

    fn heading(&mut self, text: &str) {
        self.gap(3.0);
        self.reserve(16.0);
        self.text(text, 13.0, LEFT, true);
        self.gap(1.0);
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn row(&mut self, cells: &[(f32, String)], bold: bool) {
        self.reserve(6.0);
        let font = if bold { &self.bold } else { &self.regular };
        for (x, cell) in cells {
            self.layer.use_text(cell.as_str(), 10.0, Mm(*x), Mm(self.y), font);
        }
        self.y -= 5.5;
    }

    fn rule(&self) {
        self.layer.set_outline_color(rgb(0.6, 0.6, 0.6));
        self.layer.set_outline_thickness(0.5);
        self.layer.add_line(Line {
            points: vec![point(LEFT, self.y + 3.5), point(LEFT + CHART_WIDTH + 20.0, self.y + 3.5)],
            is_closed: false,
        });
    }

    fn axes(&self, base: f32) {
        self.layer.set_outline_color(rgb(0.0, 0.0, 0.0));
        self.layer.set_outline_thickness(0.7);
        self.layer.add_line(Line {
            points: vec![
                point(LEFT + 10.0, base + CHART_HEIGHT),
                point(LEFT + 10.0, base),
                point(LEFT + 10.0 + CHART_WIDTH, base),
            ],
            is_closed: false,
        });
        for tick in [0.0_f32, 50.0, 100.0] {
            let y = base + CHART_HEIGHT * tick / 100.0;
            self.layer
                .use_text(format!("{tick:.0}%"), 7.0, Mm(LEFT), Mm(y - 1.0), &self.regular);
        }
    }

    /// Bar chart of one analysis's cell percentages.
    fn bar_chart(&mut self, bars: &[(CellType, f64)]) {
        self.reserve(CHART_HEIGHT + 16.0);
        self.y -= 4.0;
        let base = self.y - CHART_HEIGHT;
        self.axes(base);

        #[allow(clippy::cast_precision_loss)]
        let slot = CHART_WIDTH / bars.len().max(1) as f32;
        let bar_width = slot * 0.6;
        self.layer.set_fill_color(rgb(0.27, 0.45, 0.70));
        for (index, (cell, percent)) in bars.iter().enumerate() {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let (x, height) = (
                LEFT + 10.0 + slot * index as f32 + (slot - bar_width) / 2.0,
                CHART_HEIGHT * (percent.clamp(0.0, 100.0) as f32) / 100.0,
            );
            if height > 0.0 {
                self.layer.add_polygon(Polygon {
                    rings: vec![vec![
                        point(x, base),
                        point(x + bar_width, base),
                        point(x + bar_width, base + height),
                        point(x, base + height),
                    ]],
                    mode: PaintMode::Fill,
                    winding_order: WindingOrder::NonZero,
                });
            }
            self.layer.use_text(
                format!("{percent:.1}%"),
                7.0,
                Mm(x),
                Mm(base + height + 1.5),
                &self.regular,
            );
            self.layer.use_text(
                cell.display_name(),
                7.0,
                Mm(x - 2.0),
                Mm(base - 4.5),
                &self.regular,
            );
        }
        self.layer.set_fill_color(rgb(0.0, 0.0, 0.0));
        self.y = base - 10.0;
    }

    /// Line chart of myeloblast and erythroblast over the series.
    fn trend_chart(&mut self, analyses: &[&Analysis]) {
        self.reserve(CHART_HEIGHT + 20.0);
        self.y -= 4.0;
        let base = self.y - CHART_HEIGHT;
        self.axes(base);

        #[allow(clippy::cast_precision_loss)]
        let step = if analyses.len() > 1 {
            CHART_WIDTH / (analyses.len() - 1) as f32
        } else {
            0.0
        };
        let series = [
            (CellType::Myeloblast, rgb(0.80, 0.15, 0.15)),
            (CellType::Erythroblast, rgb(0.15, 0.40, 0.80)),
        ];
        for (offset, (cell, color)) in series.into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let points: Vec<(Point, bool)> = analyses
                .iter()
                .enumerate()
                .map(|(index, analysis)| {
                    let percent = analysis.results.cell_counts.get(cell).unwrap_or(0.0);
                    point(
                        LEFT + 10.0 + step * index as f32,
                        base + CHART_HEIGHT * (percent.clamp(0.0, 100.0) as f32) / 100.0,
                    )
                })
                .collect();
            self.layer.set_outline_color(color.clone());
            self.layer.set_outline_thickness(1.2);
            if points.len() > 1 {
                self.layer.add_line(Line {
                    points,
                    is_closed: false,
                });
            }
            #[allow(clippy::cast_precision_loss)]
            let legend_y = base - 6.0 - 4.0 * offset as f32;
            self.layer.set_fill_color(color);
            self.layer.use_text(
                format!("- {}", cell.display_name()),
                8.0,
                Mm(LEFT + 10.0),
                Mm(legend_y),
                &self.regular,
            );
        }
        self.layer.set_fill_color(rgb(0.0, 0.0, 0.0));
        self.y = base - 16.0;
    }

    fn patient_block(&mut self, patient: &PatientInfo) {
        self.heading("Patient Information");
        self.row(&[(LEFT, "Name:".to_string()), (LEFT + 35.0, patient.name.clone())], false);
        self.row(
            &[
                (LEFT, "Patient ID:".to_string()),
                (LEFT + 35.0, patient.id.to_string()),
            ],
            false,
        );
        self.row(&[(LEFT, "Email:".to_string()), (LEFT + 35.0, patient.email.clone())], false);
        self.row(
            &[
                (LEFT, "Generated:".to_string()),
                (LEFT + 35.0, format_date(Utc::now())),
            ],
            false,
        );
    }

    fn finish(self) -> Result<Rendered, ReportError> {
        let pages = self.pages;
        let mut buf = BufWriter::new(Vec::new());
        self.doc.save(&mut buf).map_err(ReportError::render)?;
        let bytes = buf.into_inner().map_err(ReportError::render)?;
        Ok(Rendered { bytes, pages })
    }
}

struct Rendered {
    bytes: Vec<u8>,
    pages: usize,
}

fn chronological(analyses: &[Analysis]) -> Vec<&Analysis> {
    let mut ordered: Vec<&Analysis> = analyses.iter().collect();
    ordered.sort_by_key(|analysis| (analysis.created_at, analysis.id));
    ordered
}

fn detailed(patient: &PatientInfo, analyses: &[Analysis]) -> Result<Rendered, ReportError> {
    let mut w = Writer::new("Blood Cancer Analysis Report")?;
    w.text("Blood Cancer Analysis Report", 20.0, LEFT, true);
    w.patient_block(patient);

    w.heading("Test Results");
    if analyses.is_empty() {
        w.text("No analyses on record.", 10.0, LEFT, false);
    }

    for analysis in chronological(analyses) {
        w.gap(4.0);
        w.reserve(40.0);
        w.text(
            &format!(
                "Analysis #{}: {}",
                analysis.id,
                format_date(analysis.created_at)
            ),
            11.0,
            LEFT,
            true,
        );
        w.gap(2.0);

        w.row(
            &[(LEFT, "Cell Type".to_string()), (LEFT + 70.0, "Percentage".to_string())],
            true,
        );
        w.rule();
        let bars: Vec<(CellType, f64)> = analysis.results.cell_counts.iter().collect();
        for (cell, percent) in &bars {
            w.row(
                &[
                    (LEFT, title_case(cell.as_str())),
                    (LEFT + 70.0, format!("{percent:.1}%")),
                ],
                false,
            );
        }

        w.bar_chart(&bars);

        w.heading("Risk Assessment");
        w.text(&analysis.results.risk_assessment, 10.0, LEFT, false);
        w.text(
            &format!(
                "Confidence: {:.1}%   Images: {}",
                analysis.results.details.confidence_score, analysis.results.details.image_count
            ),
            9.0,
            LEFT,
            false,
        );

        w.heading("Recommendations");
        for recommendation in &analysis.results.recommendations {
            w.text(&format!("- {recommendation}"), 10.0, LEFT + 3.0, false);
        }

        if let Some(annotation) = &analysis.annotation {
            w.heading("Doctor's Notes");
            for line in wrap(&annotation.notes, 90) {
                w.text(&line, 10.0, LEFT + 3.0, false);
            }
            w.text(
                &format!(
                    "Doctor #{} on {}",
                    annotation.doctor_id,
                    format_date(annotation.annotated_at)
                ),
                8.0,
                LEFT + 3.0,
                false,
            );
        }
    }

    w.finish()
}

fn summary(patient: &PatientInfo, analyses: &[Analysis]) -> Result<Rendered, ReportError> {
    let mut w = Writer::new("Blood Cancer Analysis Summary Report")?;
    w.text("Blood Cancer Analysis Summary Report", 20.0, LEFT, true);
    w.patient_block(patient);

    let ordered = chronological(analyses);
    w.heading("Cell Count Trends");
    if ordered.is_empty() {
        w.text("No analyses on record.", 10.0, LEFT, false);
        return w.finish();
    }

    let columns: Vec<f32> = (0..CellType::ALL.len())
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let offset = 24.0 * i as f32;
            LEFT + 28.0 + offset
        })
        .collect();
    let tier_column = LEFT + 28.0 + 24.0 * 5.0;

    let mut header = vec![(LEFT, "Date".to_string())];
    header.extend(
        CellType::ALL
            .iter()
            .zip(&columns)
            .map(|(cell, x)| (*x, short_label(*cell).to_string())),
    );
    header.push((tier_column, "Risk".to_string()));
    w.row(&header, true);
    w.rule();

    for analysis in &ordered {
        let mut row = vec![(LEFT, analysis.created_at.format("%Y-%m-%d").to_string())];
        row.extend(CellType::ALL.iter().zip(&columns).map(|(cell, x)| {
            let value = analysis
                .results
                .cell_counts
                .get(*cell)
                .map_or_else(|| "-".to_string(), |p| format!("{p:.1}%"));
            (*x, value)
        }));
        row.push((tier_column, analysis.risk_level.to_string()));
        w.row(&row, false);
    }

    w.trend_chart(&ordered);
    w.finish()
}

const fn short_label(cell: CellType) -> &'static str {
    match cell {
        CellType::Monocyte => "Mono",
        CellType::Myeloblast => "Myelo",
        CellType::Erythroblast => "Erythro",
        CellType::SegmentedNeutrophil => "Seg. Neut",
        CellType::Basophil => "Baso",
    }
}

/// Greedy word wrap at `width` characters.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Renders the full per-analysis report.
///
/// # Errors
///
/// Returns [`ReportError::Render`] if the PDF library fails.
pub fn render_detailed(
    patient: &PatientInfo,
    analyses: &[Analysis],
) -> Result<Vec<u8>, ReportError> {
    let rendered = detailed(patient, analyses)?;
    tracing::debug!(
        patient_id = patient.id,
        analyses = analyses.len(),
        pages = rendered.pages,
        "detailed report rendered"
    );
    Ok(rendered.bytes)
}

/// Renders the trend summary.
///
/// # Errors
///
/// Returns [`ReportError::Render`] if the PDF library fails.
pub fn render_summary(
    patient: &PatientInfo,
    analyses: &[Analysis],
) -> Result<Vec<u8>, ReportError> {
    let rendered = summary(patient, analyses)?;
    tracing::debug!(
        patient_id = patient.id,
        analyses = analyses.len(),
        pages = rendered.pages,
        "summary report rendered"
    );
    Ok(rendered.bytes)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::cell::CellPercentages;
    use crate::risk;
    use crate::store::{AnalysisResults, Annotation};

    fn patient() -> PatientInfo {
        PatientInfo {
            id: 3,
            name: "pat".to_string(),
            email: "pat@example.com".to_string(),
        }
    }

    fn analysis(id: i64, myeloblast: f64, days_ago: i64) -> Analysis {
        let rest = (100.0 - myeloblast - 2.0) / 3.0;
        let map = CellPercentages::from_ordered(&[rest, myeloblast, 2.0, rest, rest]).unwrap();
        let assessment = risk::assess(&map).unwrap();
        let at = Utc::now() - Duration::days(days_ago);
        Analysis {
            id,
            user_id: 3,
            created_at: at,
            risk_level: assessment.tier,
            results: AnalysisResults::new(map, &assessment, 61.0, 1, at),
            annotation: None,
        }
    }

    #[test]
    fn test_detailed_report_is_pdf() {
        let mut annotated = analysis(2, 25.0, 0);
        annotated.annotation = Some(Annotation {
            notes: "Refer to hematology. ".repeat(12),
            doctor_id: 1,
            annotated_at: Utc::now(),
        });
        let bytes = render_detailed(&patient(), &[analysis(1, 5.0, 3), annotated]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_detailed_report_paginates() {
        let one = detailed(&patient(), &[analysis(1, 5.0, 1)]).unwrap();
        assert_eq!(one.pages, 1);

        let many: Vec<Analysis> = (0..8).map(|i| analysis(i, 12.0, i)).collect();
        let rendered = detailed(&patient(), &many).unwrap();
        assert!(rendered.pages >= 4, "got {} pages", rendered.pages);
    }

    #[test]
    fn test_empty_history_still_renders() {
        assert!(render_detailed(&patient(), &[]).unwrap().starts_with(b"%PDF"));
        assert!(render_summary(&patient(), &[]).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn test_summary_report_is_pdf() {
        let series: Vec<Analysis> = (0..5).map(|i| analysis(i, 4.0 * i as f64, 5 - i)).collect();
        let rendered = summary(&patient(), &series).unwrap();
        assert!(rendered.bytes.starts_with(b"%PDF"));
        assert_eq!(rendered.pages, 1);
    }

    #[test]
    fn test_chronological_order() {
        let analyses = [analysis(1, 5.0, 0), analysis(2, 5.0, 9), analysis(3, 5.0, 4)];
        let ids: Vec<i64> = chronological(&analyses).iter().map(|a| a.id).collect();
        assert_eq!(ids, [2, 3, 1]);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("segmented_neutrophil"), "Segmented Neutrophil");
        assert_eq!(title_case("myeloblast"), "Myeloblast");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_wrap() {
        let lines = wrap("one two three four five", 9);
        assert_eq!(lines, ["one two", "three", "four five"]);
        assert!(wrap("", 10).is_empty());
    }
}

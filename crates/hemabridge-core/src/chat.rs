//! Keyword/TF-IDF chat assistant.
//!
//! Not a dialogue system. Each message is handled on its own:
//!
//! 1. If the normalized text contains an emergency phrase as whole words,
//!    the canned emergency message is returned with `is_emergency = true`.
//! 2. If it contains a farewell phrase, the farewell message is returned.
//! 3. Otherwise every knowledge-base entry is scored by cosine similarity of
//!    TF-IDF vectors (entry title plus keywords against the message). The
//!    best positive entry answers; `relevant_info` lists up to three
//!    positively scored titles, best first.
//! 4. Nothing scores: the fallback message.
//!
//! Canned messages exist in English, Spanish and French. Knowledge-base
//! answers are English only.

#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

/// Maximum titles reported in [`ChatReply::relevant_info`].
pub const MAX_RELEVANT: usize = 3;

const EMERGENCY_PHRASES: &[&str] = &[
    "chest pain",
    "can't breathe",
    "cannot breathe",
    "difficulty breathing",
    "trouble breathing",
    "severe bleeding",
    "heavy bleeding",
    "won't stop bleeding",
    "vomiting blood",
    "coughing blood",
    "coughing up blood",
    "unconscious",
    "passed out",
    "fainted",
    "seizure",
    "seizures",
    "stroke",
    "suicide",
    "kill myself",
];

const FAREWELL_PHRASES: &[&str] = &[
    "that's it",
    "bye",
    "goodbye",
    "nothing else",
    "i'm done",
    "end chat",
    "merci",
];

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "be", "can", "do", "does", "for", "how", "i", "in", "is",
    "it", "me", "my", "of", "on", "or", "the", "to", "what", "with",
];

/// Reply language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Language {
    /// English (default).
    #[default]
    English,
    /// Spanish.
    Spanish,
    /// French.
    French,
}

impl Language {
    /// Parses a language name or ISO 639-1 code; anything unrecognized is
    /// English.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "spanish" | "es" | "español" | "espanol" => Self::Spanish,
            "french" | "fr" | "français" | "francais" => Self::French,
            _ => Self::English,
        }
    }

    /// English name of the language.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Spanish => "Spanish",
            Self::French => "French",
        }
    }

    const fn emergency_message(self) -> &'static str {
        match self {
            Self::English => {
                "This sounds like a medical emergency. Please call your local emergency number \
                 or go to the nearest emergency room immediately."
            },
            Self::Spanish => {
                "Esto parece una emergencia médica. Llame de inmediato a su número de \
                 emergencias local o acuda a la sala de urgencias más cercana."
            },
            Self::French => {
                "Cela ressemble à une urgence médicale. Appelez immédiatement le numéro \
                 d'urgence local ou rendez-vous aux urgences les plus proches."
            },
        }
    }

    const fn farewell_message(self) -> &'static str {
        match self {
            Self::English => "Thank you for chatting with me! Have a wonderful day.",
            Self::Spanish => "¡Gracias por conversar conmigo! Que tenga un excelente día.",
            Self::French => "Merci d'avoir discuté avec moi ! Passez une excellente journée.",
        }
    }

    const fn fallback_message(self) -> &'static str {
        match self {
            Self::English => {
                "I understand you have a question about blood cancer. Could you be more specific?"
            },
            Self::Spanish => {
                "Entiendo que tiene una pregunta sobre el cáncer de sangre. ¿Podría ser más \
                 específico?"
            },
            Self::French => {
                "Je comprends que vous avez une question sur le cancer du sang. Pourriez-vous \
                 être plus précis ?"
            },
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One knowledge-base article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeEntry {
    /// Short title, reported in `relevant_info`.
    pub title: String,
    /// Space-separated terms the entry is indexed under, besides its title.
    pub keywords: String,
    /// Reply text.
    pub answer: String,
}

impl KnowledgeEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(title: &str, keywords: &str, answer: &str) -> Self {
        Self {
            title: title.to_string(),
            keywords: keywords.to_string(),
            answer: answer.to_string(),
        }
    }
}

/// Built-in blood-cancer knowledge base.
#[must_use]
pub fn default_knowledge_base() -> Vec<KnowledgeEntry> {
    vec![
        KnowledgeEntry::new(
            "Blood cancer overview",
            "blood cancer leukemia lymphoma myeloma overview general production marrow",
            "Blood cancer affects the production and function of blood cells. Most types start \
             in the bone marrow, where abnormal cells crowd out healthy ones. The main groups \
             are leukemia, lymphoma and myeloma.",
        ),
        KnowledgeEntry::new(
            "Myeloblasts",
            "myeloblast blast immature white cell percentage leukemia",
            "Myeloblasts are immature white blood cells normally found in the bone marrow. A \
             high proportion in a sample is one of the main signals this service looks at: \
             above 10% warrants further evaluation and above 20% needs immediate attention.",
        ),
        KnowledgeEntry::new(
            "Erythroblasts",
            "erythroblast red cell nucleated precursor percentage",
            "Erythroblasts develop into red blood cells. They are rarely seen in circulating \
             blood, so more than 5% is flagged for follow-up and more than 10% is treated as \
             high risk.",
        ),
        KnowledgeEntry::new(
            "Monocytes",
            "monocyte infection immune white cell",
            "Monocytes are white blood cells that fight infections and clear damaged cells.",
        ),
        KnowledgeEntry::new(
            "Segmented neutrophils",
            "neutrophil segmented bacteria infection common white cell",
            "Segmented neutrophils are the most common type of white blood cell and the first \
             responders to bacterial infection.",
        ),
        KnowledgeEntry::new(
            "Basophils",
            "basophil allergy histamine rare white cell",
            "Basophils are the least common white blood cells and take part in allergic \
             reactions by releasing histamine.",
        ),
        KnowledgeEntry::new(
            "Risk levels",
            "risk level high moderate low tier category assessment score",
            "Risk levels are categorized as High, Moderate, or Low based on cell counts. High \
             requires immediate medical attention, Moderate needs careful monitoring, and Low \
             means regular check-ups are recommended.",
        ),
        KnowledgeEntry::new(
            "Symptoms",
            "symptom fatigue tired infection bleeding bruising fever weight loss night sweat pale",
            "Common symptoms include fatigue, frequent infections, unusual bleeding or \
             bruising, fever, unexplained weight loss and night sweats.",
        ),
        KnowledgeEntry::new(
            "Treatment options",
            "treatment chemotherapy radiation transplant therapy cure option medication",
            "Treatment options depend on the diagnosis and risk level. They include \
             chemotherapy, targeted therapy, radiation and stem cell transplant. Your \
             hematologist will recommend a plan.",
        ),
        KnowledgeEntry::new(
            "Diagnosis and tests",
            "diagnosis test cbc biopsy bone marrow blood count lab",
            "Diagnosis usually starts with a complete blood count (CBC). If results are \
             abnormal, a bone marrow biopsy and further lab tests may be needed.",
        ),
        KnowledgeEntry::new(
            "Appointments",
            "appointment book schedule doctor visit consultation prepare",
            "You can book an appointment with a doctor from the Appointments page. Bring your \
             latest report and a list of symptoms and questions.",
        ),
        KnowledgeEntry::new(
            "Understanding your results",
            "result report analysis upload image confidence pdf history",
            "Each analysis lists the percentage of each cell type, a risk assessment and \
             recommendations. The confidence score is the share of the dominant cell type. You \
             can download a PDF report from your history.",
        ),
    ]
}

/// Assistant output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    /// Reply text.
    pub response: String,
    /// Whether the emergency override fired.
    pub is_emergency: bool,
    /// Titles of matching knowledge-base entries, best first.
    pub relevant_info: Vec<String>,
    /// Language the canned parts were given in.
    #[serde(skip)]
    pub language: Language,
}

fn normalize(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `phrase` occurs in `text` with no letter, digit or apostrophe
/// directly on either side.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '\'';
    text.match_indices(phrase).any(|(start, matched)| {
        let before = text[..start].chars().next_back();
        let after = text[start + matched.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| contains_phrase(text, phrase))
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && !STOPWORDS.contains(word))
        .map(|word| {
            if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                word[..word.len() - 1].to_string()
            } else {
                word.to_string()
            }
        })
        .collect()
}

type TermVector = HashMap<String, f64>;

fn unit(mut vector: TermVector) -> TermVector {
    let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for weight in vector.values_mut() {
            *weight /= norm;
        }
    }
    vector
}

/// TF-IDF assistant over a fixed knowledge base.
#[derive(Debug, Clone)]
pub struct ChatAssistant {
    entries: Vec<KnowledgeEntry>,
    idf: HashMap<String, f64>,
    vectors: Vec<TermVector>,
}

impl Default for ChatAssistant {
    fn default() -> Self {
        Self::new(default_knowledge_base())
    }
}

impl ChatAssistant {
    /// Indexes `entries`.
    #[must_use]
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        let documents: Vec<Vec<String>> = entries
            .iter()
            .map(|entry| tokenize(&format!("{} {}", entry.title, entry.keywords)))
            .collect();

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for terms in &documents {
            for term in terms.iter().collect::<HashSet<_>>() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
        }

        let count = documents.len() as f64;
        let idf: HashMap<String, f64> = document_frequency
            .into_iter()
            .map(|(term, df)| (term, ((1.0 + count) / (1.0 + df as f64)).ln() + 1.0))
            .collect();

        let vectors = documents
            .iter()
            .map(|terms| unit(Self::weigh(terms, &idf)))
            .collect();

        Self {
            entries,
            idf,
            vectors,
        }
    }

    fn weigh(terms: &[String], idf: &HashMap<String, f64>) -> TermVector {
        let mut vector = TermVector::new();
        for term in terms {
            if let Some(weight) = idf.get(term) {
                *vector.entry(term.clone()).or_default() += weight;
            }
        }
        vector
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the knowledge base is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scores every entry against `text`; positive scores only, best first.
    fn rank(&self, text: &str) -> Vec<(usize, f64)> {
        let query = unit(Self::weigh(&tokenize(text), &self.idf));
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, document)| {
                let score = query
                    .iter()
                    .filter_map(|(term, weight)| document.get(term).map(|d| d * weight))
                    .sum::<f64>();
                (index, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        scored
    }

    /// Answers one message.
    #[must_use]
    pub fn respond(&self, text: &str, language: Language) -> ChatReply {
        let normalized = normalize(text);

        if contains_any(&normalized, EMERGENCY_PHRASES) {
            tracing::warn!(language = %language, "emergency phrase detected in chat");
            return ChatReply {
                response: language.emergency_message().to_string(),
                is_emergency: true,
                relevant_info: Vec::new(),
                language,
            };
        }

        if contains_any(&normalized, FAREWELL_PHRASES) {
            return ChatReply {
                response: language.farewell_message().to_string(),
                is_emergency: false,
                relevant_info: Vec::new(),
                language,
            };
        }

        let ranked = self.rank(&normalized);
        let response = ranked.first().map_or_else(
            || language.fallback_message().to_string(),
            |(index, _)| self.entries[*index].answer.clone(),
        );
        let relevant_info = ranked
            .iter()
            .take(MAX_RELEVANT)
            .map(|(index, _)| self.entries[*index].title.clone())
            .collect();
        tracing::debug!(matches = ranked.len(), "chat answered");

        ChatReply {
            response,
            is_emergency: false,
            relevant_info,
            language,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant() -> ChatAssistant {
        ChatAssistant::default()
    }

    #[test]
    fn test_emergency_override() {
        let reply =
            assistant().respond("I have CHEST   pain since this morning", Language::English);
        assert!(reply.is_emergency);
        assert_eq!(reply.response, Language::English.emergency_message());
        assert!(reply.relevant_info.is_empty());
    }

    #[test]
    fn test_emergency_is_localized_and_beats_farewell() {
        let reply = assistant().respond("bye, I can\u{2019}t breathe", Language::Spanish);
        assert!(reply.is_emergency);
        assert!(reply.response.starts_with("Esto parece una emergencia"));
    }

    #[test]
    fn test_emergency_phrases_match_whole_words() {
        let reply = assistant().respond(
            "Is a strokes risk linked to leukemia treatment?",
            Language::English,
        );
        assert!(!reply.is_emergency);

        for text in ["I think she had a stroke.", "he fainted", "Seizures since Monday"] {
            assert!(assistant().respond(text, Language::English).is_emergency, "{text}");
        }

        assert!(contains_phrase("bye, thanks", "bye"));
        assert!(!contains_phrase("byelaw question", "bye"));
        assert!(!contains_phrase("i'mdone", "done"));
    }

    #[test]
    fn test_farewell() {
        let reply = assistant().respond("OK that's it, thanks", Language::French);
        assert!(!reply.is_emergency);
        assert_eq!(reply.response, Language::French.farewell_message());
        assert!(reply.relevant_info.is_empty());
    }

    #[test]
    fn test_symptoms_question_hits_symptoms_entry() {
        let reply = assistant().respond("What are the symptoms?", Language::English);
        assert!(!reply.is_emergency);
        assert_eq!(reply.relevant_info.first().map(String::as_str), Some("Symptoms"));
        assert!(reply.response.starts_with("Common symptoms include fatigue"));
    }

    #[test]
    fn test_relevant_info_is_capped_and_ordered() {
        let reply = assistant().respond(
            "myeloblast risk level and treatment after a bone marrow test",
            Language::English,
        );
        assert!(!reply.relevant_info.is_empty());
        assert!(reply.relevant_info.len() <= MAX_RELEVANT);

        let titles: HashSet<&str> = reply.relevant_info.iter().map(String::as_str).collect();
        assert_eq!(titles.len(), reply.relevant_info.len());
    }

    #[test]
    fn test_no_match_falls_back() {
        let reply = assistant().respond("xyzzy plugh", Language::English);
        assert_eq!(reply.response, Language::English.fallback_message());
        assert!(reply.relevant_info.is_empty());

        let reply = assistant().respond("the and of", Language::French);
        assert_eq!(reply.response, Language::French.fallback_message());
    }

    #[test]
    fn test_language_labels() {
        assert_eq!(Language::from_label("Spanish"), Language::Spanish);
        assert_eq!(Language::from_label("es"), Language::Spanish);
        assert_eq!(Language::from_label(" FR "), Language::French);
        assert_eq!(Language::from_label("Français"), Language::French);
        assert_eq!(Language::from_label("klingon"), Language::English);
        assert_eq!(Language::from_label(""), Language::English);
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_plurals() {
        assert_eq!(tokenize("What are the Symptoms?"), ["symptom"]);
        assert_eq!(tokenize("myeloblasts, basophils"), ["myeloblast", "basophil"]);
        assert_eq!(tokenize("class"), ["class"]);
    }

    #[test]
    fn test_custom_knowledge_base() {
        let assistant = ChatAssistant::new(vec![KnowledgeEntry::new(
            "Parking",
            "parking car garage",
            "Parking is in garage B.",
        )]);
        assert_eq!(assistant.len(), 1);
        let reply = assistant.respond("where is the garage", Language::English);
        assert_eq!(reply.response, "Parking is in garage B.");
        assert_eq!(reply.relevant_info, ["Parking"]);
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const UNSPECIFIED: &str = "unspecified";
pub const NONE: &str = "none";
pub const NONE_REPORTED: &str = "none reported";
pub const LIST_SEPARATOR: &str = ", ";
pub const MAX_PAIN_SCORE: u8 = 10;

pub const INJURY_REGIONS: [&str; 13] = [
    "ankle",
    "knee",
    "hip",
    "lower back",
    "shoulder",
    "elbow",
    "wrist or hand",
    "foot",
    "hamstring",
    "quadriceps",
    "calf",
    "neck",
    "other",
];

pub const ONSET_TYPES: [&str; 3] = ["acute trauma", "overuse", "unsure"];

pub const TRAINING_PHASES: [&str; 4] =
    ["in-season", "off-season", "pre-season", "return-to-training"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Symptom {
    Swelling,
    Instability,
    Locking,
    NumbnessOrTingling,
    VisibleDeformity,
    OpenWoundOrBleeding,
    FeverOrChills,
    HeadInjurySymptoms,
    UnableToBearWeight,
}

impl Symptom {
    pub const ALL: [Symptom; 9] = [
        Symptom::Swelling,
        Symptom::Instability,
        Symptom::Locking,
        Symptom::NumbnessOrTingling,
        Symptom::VisibleDeformity,
        Symptom::OpenWoundOrBleeding,
        Symptom::FeverOrChills,
        Symptom::HeadInjurySymptoms,
        Symptom::UnableToBearWeight,
    ];

    pub const RED_FLAGS: [Symptom; 6] = [
        Symptom::VisibleDeformity,
        Symptom::OpenWoundOrBleeding,
        Symptom::FeverOrChills,
        Symptom::HeadInjurySymptoms,
        Symptom::UnableToBearWeight,
        Symptom::NumbnessOrTingling,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Swelling => "swelling",
            Self::Instability => "joint instability",
            Self::Locking => "locking or catching",
            Self::NumbnessOrTingling => "numbness or tingling",
            Self::VisibleDeformity => "visible deformity",
            Self::OpenWoundOrBleeding => "open wound or bleeding",
            Self::FeverOrChills => "fever or chills",
            Self::HeadInjurySymptoms => "head injury symptoms",
            Self::UnableToBearWeight => "unable to bear weight",
        }
    }

    /// Serialized form, as written in intake files.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Swelling => "swelling",
            Self::Instability => "instability",
            Self::Locking => "locking",
            Self::NumbnessOrTingling => "numbness-or-tingling",
            Self::VisibleDeformity => "visible-deformity",
            Self::OpenWoundOrBleeding => "open-wound-or-bleeding",
            Self::FeverOrChills => "fever-or-chills",
            Self::HeadInjurySymptoms => "head-injury-symptoms",
            Self::UnableToBearWeight => "unable-to-bear-weight",
        }
    }

    pub fn is_red_flag(self) -> bool {
        Self::RED_FLAGS.contains(&self)
    }
}

impl fmt::Display for Symptom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Symptom {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::ALL
            .into_iter()
            .find(|symptom| {
                normalized == symptom.tag() || normalized == symptom.label().replace(' ', "-")
            })
            .ok_or_else(|| format!("unknown symptom `{value}`"))
    }
}

/// Structured athlete and injury details collected before the interview.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeRecord {
    pub sport: String,
    pub injury_region: String,
    pub injury_type: String,
    pub onset_type: String,
    pub time_since_injury: String,
    pub pain_score: u8,
    pub symptoms: Vec<Symptom>,
    pub image_path: Option<PathBuf>,
    pub training_goal: String,
    pub training_phase: String,
    pub prior_injury: String,
    pub treatments_tried: String,
    pub notes: String,
}

impl IntakeRecord {
    /// Labels of required fields that are blank, in form order.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let required = [
            ("sport", &self.sport),
            ("injury region", &self.injury_region),
            ("injury type", &self.injury_type),
            ("onset type", &self.onset_type),
            ("time since injury", &self.time_since_injury),
            ("training goal", &self.training_goal),
        ];

        required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(label, _)| label)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required_fields().is_empty()
    }

    pub fn red_flags(&self) -> Vec<Symptom> {
        red_flags(&self.symptoms)
    }

    /// Choice fields whose value is outside the known catalogue. Free text is
    /// still accepted; the hint lists the usual options.
    pub fn catalogue_hints(&self) -> Vec<String> {
        let choices: [(&str, &str, &[&str]); 3] = [
            ("injury region", self.injury_region.as_str(), &INJURY_REGIONS[..]),
            ("onset type", self.onset_type.as_str(), &ONSET_TYPES[..]),
            ("training phase", self.training_phase.as_str(), &TRAINING_PHASES[..]),
        ];

        choices
            .into_iter()
            .filter_map(|(label, value, options)| {
                let value = value.trim();
                let listed = options.iter().any(|option| option.eq_ignore_ascii_case(value));
                if value.is_empty() || listed {
                    return None;
                }
                Some(format!(
                    "{label} `{value}` is not a listed option ({})",
                    options.join(LIST_SEPARATOR)
                ))
            })
            .collect()
    }

    pub fn has_image(&self) -> bool {
        self.image_path.as_ref().is_some_and(|path| !path.as_os_str().is_empty())
    }

    pub fn clamped_pain_score(&self) -> u8 {
        self.pain_score.min(MAX_PAIN_SCORE)
    }

    /// Reported symptoms with duplicates removed, first occurrence kept.
    pub fn reported_symptoms(&self) -> Vec<Symptom> {
        let mut seen = Vec::with_capacity(self.symptoms.len());
        for symptom in &self.symptoms {
            if !seen.contains(symptom) {
                seen.push(*symptom);
            }
        }
        seen
    }
}

/// Intersection of `symptoms` with the fixed red-flag set, sorted by label.
pub fn red_flags(symptoms: &[Symptom]) -> Vec<Symptom> {
    let mut flags: Vec<Symptom> =
        symptoms.iter().copied().filter(|symptom| symptom.is_red_flag()).collect();
    flags.sort_by_key(|symptom| symptom.label());
    flags.dedup();
    flags
}

pub fn red_flag_text(symptoms: &[Symptom]) -> String {
    format_list(red_flags(symptoms).into_iter().map(Symptom::label))
}

pub fn format_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let cleaned: Vec<&str> = values.into_iter().filter(|value| !value.is_empty()).collect();
    if cleaned.is_empty() {
        NONE_REPORTED.to_string()
    } else {
        cleaned.join(LIST_SEPARATOR)
    }
}

/// Renders the record as the fixed-order block embedded in every prompt.
pub fn format_intake(record: &IntakeRecord) -> String {
    let symptoms = record.reported_symptoms();
    let lines = [
        format!("Sport: {}", or_placeholder(&record.sport, UNSPECIFIED)),
        format!("Injury region: {}", or_placeholder(&record.injury_region, UNSPECIFIED)),
        format!("Injury type: {}", or_placeholder(&record.injury_type, UNSPECIFIED)),
        format!("Onset: {}", or_placeholder(&record.onset_type, UNSPECIFIED)),
        format!("Time since injury: {}", or_placeholder(&record.time_since_injury, UNSPECIFIED)),
        format!("Pain score (0-10): {}", record.clamped_pain_score()),
        format!("Symptoms: {}", format_list(symptoms.iter().map(|symptom| symptom.label()))),
        format!("Red flags: {}", red_flag_text(&symptoms)),
        format!("Image uploaded: {}", if record.has_image() { "yes" } else { "no" }),
        format!("Training phase: {}", or_placeholder(&record.training_phase, UNSPECIFIED)),
        format!("Training goal: {}", or_placeholder(&record.training_goal, UNSPECIFIED)),
        format!("Prior injuries: {}", or_placeholder(&record.prior_injury, NONE)),
        format!("Treatments tried: {}", or_placeholder(&record.treatments_tried, NONE)),
        format!("Notes: {}", or_placeholder(&record.notes, NONE)),
    ];
    lines.join("\n")
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder
    } else {
        trimmed
    }
}

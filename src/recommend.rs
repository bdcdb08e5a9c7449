//! Header-to-field mapping recommendations and the mapping set edited by users.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::schema::CollectionField;

/// Minimum best score a header needs before it is proposed.
pub const CONFIDENCE_THRESHOLD: f64 = 0.3;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("category", &["cat", "категория"]),
    ("description", &["desc", "описание", "content"]),
    ("price", &["cost", "цена", "стоимость"]),
    ("quantity", &["qty", "количество", "stock"]),
    ("status", &["state", "статус", "состояние"]),
    ("title", &["name", "название", "наименование"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub csv_field: String,
    pub recommended_field: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub csv_field: String,
    pub collection_field: String,
}

impl FieldMapping {
    pub fn new(csv_field: impl Into<String>, collection_field: impl Into<String>) -> Self {
        FieldMapping {
            csv_field: csv_field.into(),
            collection_field: collection_field.into(),
        }
    }
}

/// Ordered mappings, unique per source column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FieldMapping>", into = "Vec<FieldMapping>")]
pub struct MappingSet {
    mappings: Vec<FieldMapping>,
}

impl MappingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_recommendations(recommendations: &[Recommendation]) -> Self {
        let mut set = MappingSet::new();
        for recommendation in recommendations {
            set.set(&recommendation.csv_field, &recommendation.recommended_field);
        }
        set
    }

    /// Maps `csv_field` to `collection_field`; an empty target removes the mapping.
    pub fn set(&mut self, csv_field: &str, collection_field: &str) {
        if collection_field.is_empty() {
            self.remove(csv_field);
            return;
        }
        match self.mappings.iter_mut().find(|m| m.csv_field == csv_field) {
            Some(existing) => existing.collection_field = collection_field.to_string(),
            None => self
                .mappings
                .push(FieldMapping::new(csv_field, collection_field)),
        }
    }

    pub fn remove(&mut self, csv_field: &str) {
        self.mappings.retain(|m| m.csv_field != csv_field);
    }

    pub fn replace(&mut self, other: MappingSet) {
        *self = other;
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn as_slice(&self) -> &[FieldMapping] {
        &self.mappings
    }

    pub fn is_target_mapped(&self, path: &str) -> bool {
        self.mappings.iter().any(|m| m.collection_field == path)
    }
}

impl From<Vec<FieldMapping>> for MappingSet {
    fn from(mappings: Vec<FieldMapping>) -> Self {
        let mut set = MappingSet::new();
        for mapping in mappings {
            set.set(&mapping.csv_field, &mapping.collection_field);
        }
        set
    }
}

impl From<MappingSet> for Vec<FieldMapping> {
    fn from(set: MappingSet) -> Self {
        set.mappings
    }
}

/// Scores how well `header` names `field`.
pub fn calculate_similarity(header: &str, field: &CollectionField) -> f64 {
    if header.is_empty() || field.path.is_empty() {
        return 0.0;
    }
    let header = header.to_lowercase();
    let path = field.path.to_lowercase();
    let label = field.label.to_lowercase();

    if header == path || header == label {
        return 1.0;
    }
    if path.contains(&header) || header.contains(&path) {
        return 0.8;
    }
    if label.contains(&header) || header.contains(&label) {
        return 0.7;
    }
    for (key, words) in SYNONYMS {
        if path.contains(key) && words.iter().any(|word| header.contains(word)) {
            return 0.6;
        }
        if header.contains(key) && words.iter().any(|word| path.contains(word)) {
            return 0.6;
        }
    }
    0.0
}

pub fn recommend(headers: &[String], fields: &[CollectionField]) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    for header in headers.iter().filter(|h| !h.trim().is_empty()) {
        let mut best: Option<(f64, &CollectionField)> = None;
        for field in fields {
            let confidence = calculate_similarity(header, field);
            if best.is_none_or(|(score, _)| confidence > score) {
                best = Some((confidence, field));
            }
        }
        match best {
            Some((confidence, field)) if confidence > CONFIDENCE_THRESHOLD => {
                recommendations.push(Recommendation {
                    csv_field: header.clone(),
                    recommended_field: field.path.clone(),
                    confidence,
                });
            }
            _ => debug!("No confident match for header '{header}'"),
        }
    }
    recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    recommendations
}

/// Exact case-insensitive path match first, then the first path that contains
/// the header or is contained in it.
pub fn auto_map(headers: &[String], fields: &[CollectionField]) -> Vec<FieldMapping> {
    headers
        .iter()
        .filter(|h| !h.trim().is_empty())
        .filter_map(|header| {
            let lowered = header.to_lowercase();
            fields
                .iter()
                .find(|field| field.path.to_lowercase() == lowered)
                .or_else(|| {
                    fields
                        .iter()
                        .find(|field| {
                            let path = field.path.to_lowercase();
                            path.contains(&lowered) || lowered.contains(&path)
                        })
                })
                .map(|field| FieldMapping::new(header.clone(), field.path.clone()))
        })
        .collect()
}

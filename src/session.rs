//! Import lifecycle: upload a table, configure mappings, process, complete.

use std::fmt;

use log::{debug, info};

use crate::{
    error::{ImportError, ImportResult},
    executor::{Executor, ImportMode, ImportProgress, ImportResponse, ImportSettings},
    parse::TableData,
    recommend::{MappingSet, Recommendation, recommend},
    schema::{CollectionField, ID_FIELD, Schema},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Upload,
    Configure,
    Processing,
    Complete,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImportStage::Upload => "upload",
            ImportStage::Configure => "configure",
            ImportStage::Processing => "processing",
            ImportStage::Complete => "complete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ImportSession {
    collection: String,
    schema: Schema,
    fields: Vec<CollectionField>,
    stage: ImportStage,
    table: Option<TableData>,
    settings: ImportSettings,
    progress: Option<ImportProgress>,
    response: Option<ImportResponse>,
}

impl ImportSession {
    pub fn new(collection: impl Into<String>, schema: Schema) -> Self {
        let fields = schema.flatten();
        ImportSession {
            collection: collection.into(),
            schema,
            fields,
            stage: ImportStage::Upload,
            table: None,
            settings: ImportSettings::default(),
            progress: None,
            response: None,
        }
    }

    pub fn stage(&self) -> ImportStage {
        self.stage
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[CollectionField] {
        &self.fields
    }

    pub fn table(&self) -> Option<&TableData> {
        self.table.as_ref()
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn progress(&self) -> Option<&ImportProgress> {
        self.progress.as_ref()
    }

    pub fn response(&self) -> Option<&ImportResponse> {
        self.response.as_ref()
    }

    fn ensure_configurable(&self) -> ImportResult<()> {
        match self.stage {
            ImportStage::Upload | ImportStage::Configure => Ok(()),
            stage => Err(ImportError::Validation(format!(
                "import settings cannot change during the {stage} stage"
            ))),
        }
    }

    /// Accepts a parsed table and moves to the configure stage.
    ///
    /// When no mapping exists yet, recommendations are applied automatically.
    /// Replacing a table with different headers discards the earlier mappings.
    pub fn load_table(&mut self, table: TableData) -> ImportResult<()> {
        self.ensure_configurable()?;
        if table.headers.is_empty() {
            return Err(ImportError::MalformedData(
                "table has no column headers".to_string(),
            ));
        }
        info!(
            "Loaded {} row(s) with {} column(s) for '{}'",
            table.row_count(),
            table.headers.len(),
            self.collection
        );
        let headers_changed = self
            .table
            .as_ref()
            .is_some_and(|previous| previous.headers != table.headers);
        if headers_changed {
            debug!("Headers changed; discarding mappings built for the previous file");
            self.settings.field_mappings = MappingSet::new();
        }
        self.table = Some(table);
        self.stage = ImportStage::Configure;
        if self.settings.field_mappings.is_empty() {
            self.apply_recommendations();
        }
        Ok(())
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        match &self.table {
            Some(table) => recommend(&table.headers, &self.fields),
            None => Vec::new(),
        }
    }

    /// Replaces the mapping set with the current recommendations.
    pub fn apply_recommendations(&mut self) {
        let recommendations = self.recommendations();
        debug!("Applying {} recommendation(s)", recommendations.len());
        self.settings
            .field_mappings
            .replace(MappingSet::from_recommendations(&recommendations));
    }

    /// Maps a column to a field path; an empty path removes the mapping.
    pub fn set_mapping(&mut self, csv_field: &str, collection_field: &str) -> ImportResult<()> {
        self.ensure_configurable()?;
        if !collection_field.is_empty() && !self.schema.is_known_path(collection_field) {
            return Err(ImportError::Validation(format!(
                "'{collection_field}' is not a field of '{}'",
                self.collection
            )));
        }
        self.settings.field_mappings.set(csv_field, collection_field);
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ImportMode) -> ImportResult<()> {
        self.ensure_configurable()?;
        self.settings.mode = mode;
        Ok(())
    }

    pub fn set_compare_field(&mut self, field: Option<String>) -> ImportResult<()> {
        self.ensure_configurable()?;
        self.settings.compare_field = field.filter(|f| !f.trim().is_empty());
        Ok(())
    }

    pub fn set_locale(&mut self, locale: Option<String>) -> ImportResult<()> {
        self.ensure_configurable()?;
        self.settings.locale = locale;
        Ok(())
    }

    /// Reasons the import cannot start yet; empty when it can.
    pub fn missing_requirements(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.table.is_none() {
            missing.push("no file has been loaded".to_string());
        }
        let mappings = &self.settings.field_mappings;
        if mappings.is_empty() {
            missing.push("at least one column must be mapped".to_string());
        }
        for field in self.fields.iter().filter(|field| field.required) {
            if !mappings.is_target_mapped(&field.path) {
                missing.push(format!("required field \"{}\" is not mapped", field.path));
            }
        }
        match self.settings.compare_field() {
            None if self.settings.mode.needs_compare_field() => missing.push(format!(
                "{} mode requires a compare field",
                self.settings.mode
            )),
            Some(ID_FIELD) if !mappings.is_target_mapped(ID_FIELD) => {
                missing.push("comparing by \"id\" requires a column mapped to \"id\"".to_string())
            }
            _ => {}
        }
        missing
    }

    pub fn can_proceed(&self) -> bool {
        self.stage == ImportStage::Configure && self.missing_requirements().is_empty()
    }

    /// Runs the import; allowed once, from the configure stage.
    pub async fn start(&mut self, executor: &Executor<'_>) -> ImportResult<&ImportResponse> {
        if self.stage != ImportStage::Configure {
            return Err(ImportError::Validation(format!(
                "cannot start an import from the {} stage",
                self.stage
            )));
        }
        let missing = self.missing_requirements();
        if !missing.is_empty() {
            return Err(ImportError::Validation(missing.join("; ")));
        }
        let records = self
            .table
            .as_ref()
            .map(TableData::records)
            .unwrap_or_default();
        self.stage = ImportStage::Processing;
        self.progress = Some(ImportProgress::new(records.len()));

        let progress = &mut self.progress;
        let response = executor
            .execute_with_progress(
                &self.collection,
                &self.schema,
                &records,
                &self.settings,
                |snapshot| *progress = Some(snapshot.clone()),
            )
            .await;

        self.stage = ImportStage::Complete;
        Ok(self.response.insert(response))
    }

    /// Drops the table, mappings and results and returns to the upload stage.
    pub fn reset(&mut self) {
        debug!("Resetting import session for '{}'", self.collection);
        self.stage = ImportStage::Upload;
        self.table = None;
        self.settings = ImportSettings::default();
        self.progress = None;
        self.response = None;
    }
}

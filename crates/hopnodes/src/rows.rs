use async_trait::async_trait;
use hopcore::{EntryConfig, EntryContext, EntryError, JobResult, ResultFile, Row, UnitExecutor};
use hopruntime::{EntryFactory, EntryTypeMetadata};

/// Adds fixed rows and file references to the previous result
#[derive(Clone, Default)]
pub struct RowsEntry {
    rows: Vec<Row>,
    files: Vec<String>,
}

impl RowsEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }
}

#[async_trait]
impl UnitExecutor for RowsEntry {
    fn entry_type(&self) -> &str {
        "data.rows"
    }

    async fn execute(&mut self, ctx: EntryContext) -> Result<JobResult, EntryError> {
        let mut result = ctx.previous;
        result.entry_nr = ctx.nr;
        result.success = true;
        result.rows.extend(self.rows.iter().cloned());
        result.lines_written += self.rows.len() as u64;
        for path in &self.files {
            result
                .files
                .push(ResultFile::new(path.clone()).with_origin(ctx.entry.name.clone()));
        }
        ctx.events.info(format!(
            "Added {} row(s) and {} file(s)",
            self.rows.len(),
            self.files.len()
        ));
        Ok(result)
    }
}

pub struct RowsEntryFactory;

impl EntryFactory for RowsEntryFactory {
    fn create(&self, config: &EntryConfig) -> Result<Box<dyn UnitExecutor>, EntryError> {
        let mut entry = RowsEntry::new();

        if let Some(rows) = config.get("rows") {
            let rows = rows
                .as_array()
                .ok_or_else(|| EntryError::Configuration("rows must be a list of objects".to_string()))?;
            for row in rows {
                let fields = row
                    .as_object()
                    .ok_or_else(|| EntryError::Configuration("rows must be a list of objects".to_string()))?;
                entry = entry.with_row(Row::from(fields.clone()));
            }
        }
        if let Some(files) = config.get("files").and_then(|v| v.as_array()) {
            for path in files.iter().filter_map(|v| v.as_str()) {
                entry = entry.with_file(path);
            }
        }
        Ok(Box::new(entry))
    }

    fn entry_type(&self) -> &str {
        "data.rows"
    }

    fn metadata(&self) -> EntryTypeMetadata {
        EntryTypeMetadata {
            description: "Adds result rows and files".to_string(),
            category: "data".to_string(),
        }
    }
}

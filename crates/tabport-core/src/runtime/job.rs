//! Export job definitions and the kind → job registry.
//!
//! A job turns [`JobParams`] into an [`Artifact`]. [`TabularJob`] covers the
//! common case: fetch records from a source, project them through the mapper
//! into a generated sheet or a loaded template, and encode the result. The
//! CPU-bound render step runs under `spawn_blocking`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapper::{ColumnSpec, MapperError, MatchMode, Record, write_header, write_rows};
use crate::runtime::types::{Artifact, RuntimeError};
use crate::workbook::{Workbook, WorkbookError, placeholder_workbook, xlsx};

/// Failures raised while producing an artifact.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The record source failed.
    #[error("data source failed: {0}")]
    Source(String),

    #[error(transparent)]
    Mapper(#[from] MapperError),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error("template error: {0}")]
    Template(String),

    #[error("render task failed: {0}")]
    Render(String),
}

/// A `{field, header}` pair supplied with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnParam {
    pub field: String,
    pub header: String,
}

/// Per-request job parameters.
///
/// Every field is optional; each job kind reads the ones it understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobParams {
    /// Number of records a generating source should produce.
    pub count: Option<usize>,
    /// Artificial source latency, for exercising the detach path.
    pub delay_ms: Option<u64>,
    /// Inline rows for sources that take their data from the request.
    pub rows: Vec<serde_json::Value>,
    /// Explicit columns; override inference and switch templates to exact matching.
    pub columns: Vec<ColumnParam>,
    pub title: Option<String>,
    /// Overrides the generated `{prefix}_export_{timestamp}.xlsx` name.
    pub file_name: Option<String>,
}

impl JobParams {
    fn column_pairs(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.field.clone(), c.header.clone()))
            .collect()
    }
}

/// What a job kind advertises about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub kind: String,
    pub description: String,
    pub default_deadline_ms: Option<u64>,
    pub templated: bool,
}

/// One exportable job kind.
pub trait ExportJob: Send + Sync + 'static {
    fn kind(&self) -> &str;

    fn info(&self) -> JobInfo;

    /// Deadline used when the request does not carry one.
    fn default_deadline(&self) -> Option<Duration>;

    /// Reject bad parameters before a task is created.
    fn validate(&self, _params: &JobParams) -> Result<(), JobError> {
        Ok(())
    }

    /// Produce the artifact. The future owns everything it needs so it can
    /// outlive the request that started it.
    fn run(self: Arc<Self>, params: JobParams) -> BoxFuture<'static, Result<Artifact, JobError>>;
}

/// `{prefix}_export_{yyyyMMdd_HHmmss}.xlsx`
pub fn export_file_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{prefix}_export_{}.xlsx", now.format("%Y%m%d_%H%M%S"))
}

/// Loads the records for one run.
pub type RecordSource<R> =
    Arc<dyn Fn(JobParams) -> BoxFuture<'static, Result<Vec<R>, JobError>> + Send + Sync>;

/// Extra `${name}` values derived from the fetched records.
pub type ContextFn<R> = Arc<dyn Fn(&[R]) -> BTreeMap<String, String> + Send + Sync>;

type Validator = Arc<dyn Fn(&JobParams) -> Result<(), JobError> + Send + Sync>;

/// A pre-built workbook whose first sheet receives the data.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    workbook: Arc<Workbook>,
    header_row: u32,
    data_start_row: u32,
    exact: Option<Vec<(String, String)>>,
}

impl TemplateLayout {
    /// Columns are matched automatically against `header_row`.
    pub fn new(workbook: Workbook, header_row: u32, data_start_row: u32) -> Self {
        Self {
            workbook: Arc::new(workbook),
            header_row,
            data_start_row,
            exact: None,
        }
    }

    pub fn from_xlsx(bytes: &[u8], header_row: u32, data_start_row: u32) -> Result<Self, JobError> {
        let workbook = Workbook::from_xlsx(bytes)?;
        if workbook.sheets().is_empty() {
            return Err(JobError::Template("template has no sheets".into()));
        }
        Ok(Self::new(workbook, header_row, data_start_row))
    }

    /// Match `(field, header)` pairs by exact header text instead.
    pub fn with_exact_columns<F, H>(mut self, pairs: impl IntoIterator<Item = (F, H)>) -> Self
    where
        F: Into<String>,
        H: Into<String>,
    {
        self.exact = Some(pairs.into_iter().map(|(f, h)| (f.into(), h.into())).collect());
        self
    }
}

/// Where rendered rows go.
#[derive(Debug, Clone)]
pub enum Layout {
    /// A fresh sheet: headers on row 0, data from row 1.
    Generated {
        sheet_name: String,
        columns: Option<ColumnSpec>,
    },
    Template(TemplateLayout),
}

/// A job built from a record source and a layout.
pub struct TabularJob<R> {
    kind: String,
    description: String,
    file_prefix: String,
    title: String,
    deadline: Option<Duration>,
    source: RecordSource<R>,
    layout: Layout,
    context: Option<ContextFn<R>>,
    validator: Option<Validator>,
}

impl<R> fmt::Debug for TabularJob<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularJob")
            .field("kind", &self.kind)
            .field("file_prefix", &self.file_prefix)
            .field("deadline", &self.deadline)
            .field("layout", &self.layout)
            .finish()
    }
}

impl<R: Record + Send + Sync + 'static> TabularJob<R> {
    pub fn new<F>(kind: impl Into<String>, source: F) -> Self
    where
        F: Fn(JobParams) -> BoxFuture<'static, Result<Vec<R>, JobError>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        Self {
            description: String::new(),
            file_prefix: kind.clone(),
            title: kind.clone(),
            layout: default_layout(&kind),
            kind,
            deadline: None,
            source: Arc::new(source),
            context: None,
            validator: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn context<F>(mut self, context: F) -> Self
    where
        F: Fn(&[R]) -> BTreeMap<String, String> + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&JobParams) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Values for `${name}` tokens in a template.
    fn placeholder_values(&self, records: &[R], params: &JobParams) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert(
            "title".to_owned(),
            params.title.clone().unwrap_or_else(|| self.title.clone()),
        );
        values.insert(
            "generatedDate".to_owned(),
            Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
        );
        values.insert("exportType".to_owned(), self.kind.clone());
        values.insert("totalRecords".to_owned(), records.len().to_string());
        if let Some(context) = &self.context {
            values.extend(context(records));
        }
        values
    }

    /// Project `records` into a workbook and encode it.
    fn render(&self, records: &[R], params: &JobParams) -> Result<Vec<u8>, JobError> {
        if records.is_empty() {
            return Ok(placeholder_workbook().to_xlsx()?);
        }

        match &self.layout {
            Layout::Generated { sheet_name, columns } => {
                let spec = if !params.columns.is_empty() {
                    ColumnSpec::explicit(params.column_pairs())
                } else if let Some(spec) = columns {
                    spec.clone()
                } else {
                    ColumnSpec::infer(records)?
                };
                let mut workbook = Workbook::new();
                let sheet = workbook.create_sheet(sheet_name);
                write_header(sheet, &spec, 0);
                write_rows(sheet, records, &spec, 1)?;
                Ok(workbook.to_xlsx()?)
            }
            Layout::Template(template) => {
                let mode = if !params.columns.is_empty() {
                    MatchMode::Exact(params.column_pairs())
                } else if let Some(pairs) = &template.exact {
                    MatchMode::Exact(pairs.clone())
                } else {
                    let fields = records[0]
                        .field_names()
                        .into_iter()
                        .map(|f| f.into_owned())
                        .collect();
                    MatchMode::Auto(fields)
                };
                let values = self.placeholder_values(records, params);

                let mut workbook = (*template.workbook).clone();
                let sheet = workbook
                    .sheet_mut(0)
                    .ok_or_else(|| JobError::Template("template has no sheets".into()))?;
                sheet.fill_placeholders(&values);
                let spec = ColumnSpec::resolve_against(sheet, template.header_row, &mode)?;
                if spec.is_empty() {
                    tracing::warn!(job_kind = %self.kind, "no template column matched any field");
                }
                write_rows(sheet, records, &spec, template.data_start_row)?;
                Ok(workbook.to_xlsx()?)
            }
        }
    }
}

fn default_layout(kind: &str) -> Layout {
    Layout::Generated {
        sheet_name: crate::mapper::humanize(kind),
        columns: None,
    }
}

impl<R: Record + Send + Sync + 'static> ExportJob for TabularJob<R> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn info(&self) -> JobInfo {
        JobInfo {
            kind: self.kind.clone(),
            description: self.description.clone(),
            default_deadline_ms: self
                .deadline
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            templated: matches!(self.layout, Layout::Template(_)),
        }
    }

    fn default_deadline(&self) -> Option<Duration> {
        self.deadline
    }

    fn validate(&self, params: &JobParams) -> Result<(), JobError> {
        if params.columns.iter().any(|c| c.field.trim().is_empty()) {
            return Err(JobError::InvalidParams("column field must not be empty".into()));
        }
        match &self.validator {
            Some(validator) => validator(params),
            None => Ok(()),
        }
    }

    fn run(self: Arc<Self>, params: JobParams) -> BoxFuture<'static, Result<Artifact, JobError>> {
        Box::pin(async move {
            let records = (self.source)(params.clone()).await?;
            let record_count = records.len() as u64;
            let file_name = params
                .file_name
                .clone()
                .unwrap_or_else(|| export_file_name(&self.file_prefix, Local::now()));

            let job = Arc::clone(&self);
            let bytes = tokio::task::spawn_blocking(move || job.render(&records, &params))
                .await
                .map_err(|e| JobError::Render(e.to_string()))??;

            tracing::debug!(
                job_kind = %self.kind,
                record_count,
                size = bytes.len(),
                "artifact rendered"
            );
            Ok(Artifact {
                bytes: Bytes::from(bytes),
                file_name,
                content_type: xlsx::CONTENT_TYPE.to_owned(),
                record_count,
            })
        })
    }
}

/// The constructed `kind → job` table handed to the orchestrator.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<dyn ExportJob>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("kinds", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a job under its own kind.
    pub fn register(&mut self, job: impl ExportJob) -> &mut Self {
        self.register_arc(Arc::new(job))
    }

    pub fn register_arc(&mut self, job: Arc<dyn ExportJob>) -> &mut Self {
        self.jobs.insert(job.kind().to_owned(), job);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ExportJob>> {
        self.jobs.get(kind).cloned()
    }

    pub fn infos(&self) -> Vec<JobInfo> {
        self.jobs.values().map(|j| j.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Look up `kind` and validate `params` against it.
    pub fn resolve(&self, kind: &str, params: &JobParams) -> Result<Arc<dyn ExportJob>, RuntimeError> {
        let job = self
            .get(kind)
            .ok_or_else(|| RuntimeError::Validation(format!("unsupported job kind '{kind}'")))?;
        job.validate(params)
            .map_err(|e| RuntimeError::Validation(e.to_string()))?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::JsonRecord;
    use crate::workbook::{CellValue, NO_DATA_SHEET, NO_DATA_TEXT};
    use futures::FutureExt;
    use serde_json::json;

    fn json_job() -> TabularJob<JsonRecord> {
        TabularJob::new("custom", |params: JobParams| {
            async move {
                params
                    .rows
                    .into_iter()
                    .map(|v| JsonRecord::from_value(v).ok_or_else(|| JobError::InvalidParams("row".into())))
                    .collect::<Result<Vec<_>, _>>()
            }
            .boxed()
        })
        .file_prefix("custom")
        .deadline(Duration::from_secs(1))
    }

    fn params(rows: Vec<serde_json::Value>) -> JobParams {
        JobParams {
            rows,
            ..JobParams::default()
        }
    }

    #[test]
    fn file_names_follow_prefix_and_timestamp() {
        use chrono::TimeZone;
        let now = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(export_file_name("employees", now), "employees_export_20260304_050607.xlsx");
    }

    #[tokio::test]
    async fn generated_layout_writes_headers_then_rows() {
        let job = Arc::new(json_job());
        let artifact = job
            .run(params(vec![
                json!({"firstName": "Ada", "age": 36}),
                json!({"firstName": "Linus", "age": 28}),
            ]))
            .await
            .unwrap();

        assert_eq!(artifact.record_count, 2);
        assert!(artifact.file_name.starts_with("custom_export_"));
        assert_eq!(artifact.content_type, xlsx::CONTENT_TYPE);

        let workbook = Workbook::from_xlsx(&artifact.bytes).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.name(), "Custom");
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some("First Name"));
        assert_eq!(sheet.cell(0, 1).and_then(CellValue::as_text), Some("Age"));
        assert_eq!(sheet.cell(2, 0).and_then(CellValue::as_text), Some("Linus"));
        assert_eq!(sheet.cell(2, 1), Some(&CellValue::Number(28.0)));
    }

    #[tokio::test]
    async fn explicit_columns_override_inference() {
        let job = Arc::new(json_job());
        let mut p = params(vec![json!({"a": 1, "b": 2, "c": 3})]);
        p.columns = vec![
            ColumnParam { field: "c".into(), header: "Third".into() },
            ColumnParam { field: "a".into(), header: "First".into() },
        ];
        let artifact = job.run(p).await.unwrap();
        let workbook = Workbook::from_xlsx(&artifact.bytes).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some("Third"));
        assert_eq!(sheet.cell(1, 0), Some(&CellValue::Number(3.0)));
        assert_eq!(sheet.cell(1, 1), Some(&CellValue::Number(1.0)));
        assert!(sheet.cell(1, 2).is_none());
    }

    #[tokio::test]
    async fn empty_dataset_yields_placeholder_artifact() {
        let job = Arc::new(json_job());
        let artifact = job.run(params(vec![])).await.unwrap();
        assert_eq!(artifact.record_count, 0);

        let workbook = Workbook::from_xlsx(&artifact.bytes).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.name(), NO_DATA_SHEET);
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some(NO_DATA_TEXT));
    }

    #[tokio::test]
    async fn template_layout_fills_placeholders_and_keeps_layout() {
        let mut template = Workbook::new();
        let sheet = template.create_sheet("Report");
        sheet.row_mut(0).set(0, "${title}");
        sheet.row_mut(2).set(0, "Rows: ${totalRecords}");
        let header = sheet.row_mut(4);
        header.set(0, "Name");
        header.set(2, "Score");
        let bytes = template.to_xlsx().unwrap();

        let job = json_job()
            .title("Score Sheet")
            .layout(Layout::Template(TemplateLayout::from_xlsx(&bytes, 4, 5).unwrap()));
        let artifact = Arc::new(job)
            .run(params(vec![
                json!({"name": "a", "score": 1, "ignored": true}),
                json!({"name": "b", "score": 2, "ignored": false}),
            ]))
            .await
            .unwrap();

        let workbook = Workbook::from_xlsx(&artifact.bytes).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some("Score Sheet"));
        assert_eq!(sheet.cell(2, 0).and_then(CellValue::as_text), Some("Rows: 2"));
        assert_eq!(sheet.cell(6, 0).and_then(CellValue::as_text), Some("b"));
        assert_eq!(sheet.cell(6, 2), Some(&CellValue::Number(2.0)));
        assert!(sheet.cell(6, 1).is_none());
    }

    #[test]
    fn registry_rejects_unknown_kinds_and_bad_params() {
        let mut registry = JobRegistry::new();
        registry.register(json_job().validate_with(|p| {
            if p.rows.len() > 2 {
                Err(JobError::InvalidParams("too many rows".into()))
            } else {
                Ok(())
            }
        }));

        assert!(registry.resolve("custom", &JobParams::default()).is_ok());
        assert!(matches!(
            registry.resolve("nope", &JobParams::default()),
            Err(RuntimeError::Validation(_))
        ));
        let err = registry
            .resolve("custom", &params(vec![json!({}), json!({}), json!({})]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("too many rows"));
        assert_eq!(registry.infos()[0].default_deadline_ms, Some(1000));
    }
}

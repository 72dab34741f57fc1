//! Built-in export kinds and their bundled template.
//!
//! - `employees`: sample employee data written into a template.
//! - `products`: sample product catalog on a generated sheet.
//! - `custom`: caller-supplied JSON rows, optionally with explicit columns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::FutureExt;
use tabport_core::impl_record;
use tabport_core::mapper::JsonRecord;
use tabport_core::workbook::Workbook;
use tabport_core::{JobError, JobParams, JobRegistry, Layout, TabularJob, TemplateLayout};
use tracing::info;

pub const EMPLOYEE_TEMPLATE: &str = "employee_template.xlsx";

/// Header row and first data row of the employee template.
const HEADER_ROW: u32 = 4;
const DATA_START_ROW: u32 = 5;

const DEFAULT_COUNT: usize = 10;
const MAX_COUNT: usize = 1_000_000;
const MAX_DELAY_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
    pub salary: u64,
    pub age: u32,
}

impl_record!(Employee {
    "firstName" => first_name,
    "lastName" => last_name,
    "email" => email,
    "department" => department,
    "salary" => salary,
    "age" => age,
});

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub price: u64,
    pub stock: u32,
    pub description: String,
}

impl_record!(Product {
    "name" => name,
    "category" => category,
    "price" => price,
    "stock" => stock,
    "description" => description,
});

const FIRST_NAMES: &[&str] = &[
    "Nguyen", "Tran", "Le", "Pham", "Hoang", "Phan", "Vu", "Vo", "Dang", "Bui", "Do", "Ho", "Ngo",
    "Duong", "Ly", "Mai", "Trinh", "Lam", "Truong", "Dinh",
];
const LAST_NAMES: &[&str] = &[
    "Van A", "Thi B", "Van C", "Thi D", "Van E", "Thi F", "Van G", "Thi H", "Van I", "Thi J", "Van K",
    "Thi L", "Van M", "Thi N", "Van O", "Thi P",
];
const DEPARTMENTS: &[&str] = &["IT", "HR", "Finance", "Marketing", "Sales", "Operations", "R&D", "Legal"];
const PRODUCT_NAMES: &[&str] = &[
    "Laptop Dell",
    "iPhone 15",
    "Samsung Galaxy",
    "MacBook Pro",
    "iPad Air",
    "Surface Pro",
    "AirPods",
    "Watch Series",
    "Gaming Mouse",
    "Keyboard",
];
const CATEGORIES: &[&str] = &["Electronics", "Computers", "Mobile", "Accessories", "Gaming", "Audio"];

/// Deterministic sample employees; the same `count` always yields the same rows.
pub fn sample_employees(count: usize) -> Vec<Employee> {
    (0..count)
        .map(|i| {
            let first_name = FIRST_NAMES[i % FIRST_NAMES.len()];
            let last_name = LAST_NAMES[(i * 7 + 3) % LAST_NAMES.len()];
            Employee {
                email: format!(
                    "{}.{}.{i}@company.com",
                    first_name.to_lowercase(),
                    last_name.to_lowercase().replace(' ', "")
                ),
                first_name: first_name.to_owned(),
                last_name: last_name.to_owned(),
                department: DEPARTMENTS[(i * 3) % DEPARTMENTS.len()].to_owned(),
                salary: 15_000_000 + (i as u64 * 7_919) % 35_000_000,
                age: 22 + (i as u32 * 13) % 38,
            }
        })
        .collect()
}

pub fn sample_products(count: usize) -> Vec<Product> {
    (0..count)
        .map(|i| {
            let name = format!("{} {}", PRODUCT_NAMES[i % PRODUCT_NAMES.len()], i + 1);
            Product {
                description: format!("High quality {} for professional use", name.to_lowercase()),
                category: CATEGORIES[(i * 5) % CATEGORIES.len()].to_owned(),
                price: 100_000 + (i as u64 * 104_729) % 50_000_000,
                stock: (i as u32 * 37) % 1000,
                name,
            }
        })
        .collect()
}

/// The employee report layout: title, date and total rows above the header.
pub fn employee_template() -> Workbook {
    let mut workbook = Workbook::new();
    let sheet = workbook.create_sheet("Employees");
    sheet.row_mut(0).set(0, "${title}");
    sheet.row_mut(1).set(0, "Generated: ${generatedDate}");
    sheet.row_mut(2).set(0, "Total Employees: ${totalEmployees}");
    let header = sheet.row_mut(HEADER_ROW);
    for (col, text) in ["First Name", "Last Name", "Email", "Department", "Salary", "Age"]
        .into_iter()
        .enumerate()
    {
        header.set(col as u16, text);
    }
    workbook
}

/// Write bundled templates into `dir` unless they already exist.
pub async fn ensure_templates(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(EMPLOYEE_TEMPLATE);
    if tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }
    tokio::fs::create_dir_all(dir).await?;
    let bytes = employee_template().to_xlsx()?;
    tokio::fs::write(&path, bytes).await?;
    info!(path = %path.display(), "employee template created");
    Ok(path)
}

fn check_generator_params(params: &JobParams) -> Result<(), JobError> {
    if params.count.is_some_and(|c| c > MAX_COUNT) {
        return Err(JobError::InvalidParams(format!("count must be at most {MAX_COUNT}")));
    }
    if params.delay_ms.is_some_and(|d| d > MAX_DELAY_MS) {
        return Err(JobError::InvalidParams(format!("delayMs must be at most {MAX_DELAY_MS}")));
    }
    Ok(())
}

async fn simulate_latency(params: &JobParams) {
    if let Some(ms) = params.delay_ms.filter(|ms| *ms > 0) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn employees_job(template: TemplateLayout) -> TabularJob<Employee> {
    TabularJob::new("employees", |params: JobParams| {
        async move {
            simulate_latency(&params).await;
            Ok::<_, JobError>(sample_employees(params.count.unwrap_or(DEFAULT_COUNT)))
        }
        .boxed()
    })
    .description("Sample employee report rendered into the bundled template")
    .file_prefix("employees")
    .title("Employee Report")
    .deadline(Duration::from_secs(1))
    .layout(Layout::Template(template))
    .context(|records: &[Employee]| BTreeMap::from([("totalEmployees".to_owned(), records.len().to_string())]))
    .validate_with(check_generator_params)
}

fn products_job() -> TabularJob<Product> {
    TabularJob::new("products", |params: JobParams| {
        async move {
            simulate_latency(&params).await;
            Ok::<_, JobError>(sample_products(params.count.unwrap_or(DEFAULT_COUNT)))
        }
        .boxed()
    })
    .description("Sample product catalog on a generated sheet")
    .file_prefix("products")
    .title("Product Catalog")
    .deadline(Duration::from_secs(5))
    .validate_with(check_generator_params)
}

fn custom_job() -> TabularJob<JsonRecord> {
    TabularJob::new("custom", |params: JobParams| {
        async move {
            simulate_latency(&params).await;
            params
                .rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| {
                    JsonRecord::from_value(row)
                        .ok_or_else(|| JobError::InvalidParams(format!("rows[{i}] is not an object")))
                })
                .collect::<Result<Vec<_>, _>>()
        }
        .boxed()
    })
    .description("Caller-supplied JSON rows; columns follow the first row unless given")
    .file_prefix("custom")
    .title("Custom Export")
    .deadline(Duration::from_secs(1))
    .validate_with(|params| {
        if let Some(i) = params.rows.iter().position(|row| !row.is_object()) {
            return Err(JobError::InvalidParams(format!("rows[{i}] is not an object")));
        }
        if params.delay_ms.is_some_and(|d| d > MAX_DELAY_MS) {
            return Err(JobError::InvalidParams(format!("delayMs must be at most {MAX_DELAY_MS}")));
        }
        Ok(())
    })
}

/// Build the registry, creating bundled templates in `template_dir` as needed.
pub async fn build_registry(template_dir: &Path) -> anyhow::Result<JobRegistry> {
    let path = ensure_templates(template_dir).await?;
    let bytes = tokio::fs::read(&path).await?;
    let template = TemplateLayout::from_xlsx(&bytes, HEADER_ROW, DATA_START_ROW)?;

    let mut registry = JobRegistry::new();
    registry
        .register(employees_job(template))
        .register(products_job())
        .register(custom_job());
    Ok(registry)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tabport_core::ExportJob;
    use tabport_core::workbook::CellValue;

    use super::*;
    use crate::testing::Scratch;

    #[test]
    fn samples_are_deterministic() {
        assert_eq!(sample_employees(25), sample_employees(25));
        assert_eq!(sample_products(3)[2].name, "MacBook Pro 3");
        let e = &sample_employees(1)[0];
        assert!((22..60).contains(&e.age));
        assert!(e.email.ends_with("@company.com"));
    }

    #[tokio::test]
    async fn template_is_created_once() {
        let dir = Scratch::new("templates");
        let path = ensure_templates(dir.path()).await.unwrap();
        let first = tokio::fs::read(&path).await.unwrap();
        ensure_templates(dir.path()).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), first);

        let workbook = Workbook::from_xlsx(&first).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.name(), "Employees");
        assert_eq!(sheet.cell(HEADER_ROW, 5).and_then(CellValue::as_text), Some("Age"));
    }

    #[tokio::test]
    async fn employees_fill_template_and_placeholders() {
        let dir = Scratch::new("templates");
        let registry = build_registry(dir.path()).await.unwrap();
        let job = registry.get("employees").unwrap();
        let artifact = Arc::clone(&job)
            .run(JobParams {
                count: Some(3),
                ..JobParams::default()
            })
            .await
            .unwrap();
        assert!(artifact.file_name.starts_with("employees_export_"));
        assert_eq!(artifact.record_count, 3);

        let workbook = Workbook::from_xlsx(&artifact.bytes).unwrap();
        let sheet = workbook.sheet(0).unwrap();
        assert_eq!(sheet.cell(0, 0).and_then(CellValue::as_text), Some("Employee Report"));
        assert_eq!(sheet.cell(2, 0).and_then(CellValue::as_text), Some("Total Employees: 3"));
        assert!(
            sheet
                .cell(1, 0)
                .and_then(CellValue::as_text)
                .is_some_and(|t| t.starts_with("Generated: ") && !t.contains("${"))
        );
        let first = &sample_employees(3)[0];
        assert_eq!(
            sheet.cell(DATA_START_ROW, 0).and_then(CellValue::as_text),
            Some(first.first_name.as_str())
        );
        assert_eq!(sheet.cell(DATA_START_ROW + 2, 5), Some(&CellValue::Number(sample_employees(3)[2].age as f64)));
    }

    #[tokio::test]
    async fn registry_advertises_kinds_and_deadlines() {
        let dir = Scratch::new("templates");
        let registry = build_registry(dir.path()).await.unwrap();
        let kinds: Vec<_> = registry.infos().into_iter().map(|i| (i.kind, i.default_deadline_ms)).collect();
        assert_eq!(
            kinds,
            vec![
                ("custom".to_owned(), Some(1000)),
                ("employees".to_owned(), Some(1000)),
                ("products".to_owned(), Some(5000)),
            ]
        );
    }

    #[tokio::test]
    async fn custom_rows_must_be_objects() {
        let dir = Scratch::new("templates");
        let registry = build_registry(dir.path()).await.unwrap();
        let params = JobParams {
            rows: vec![serde_json::json!({"a": 1}), serde_json::json!(2)],
            ..JobParams::default()
        };
        assert!(registry.resolve("custom", &params).is_err());
        assert!(
            registry
                .resolve(
                    "products",
                    &JobParams {
                        count: Some(MAX_COUNT + 1),
                        ..JobParams::default()
                    }
                )
                .is_err()
        );
    }
}

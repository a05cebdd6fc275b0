//! Deterministic synthetic insurance data for tests.

use std::{
    fs,
    path::{Path, PathBuf},
};

use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

use crate::entity::{
    config::PipelineConfig, schema::tests::INSURANCE_SCHEMA, CustomerRecord, RecordSet,
};

pub const COLUMNS: [&str; 12] = [
    "id",
    "Gender",
    "Age",
    "Driving_License",
    "Region_Code",
    "Previously_Insured",
    "Vehicle_Age",
    "Vehicle_Damage",
    "Annual_Premium",
    "Policy_Sales_Channel",
    "Vintage",
    "Response",
];

/// `rows` applicants; interest is likely only for uninsured owners of damaged vehicles.
pub fn insurance_table(rows: usize, seed: u64) -> RecordSet {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = (0..rows)
        .map(|idx| {
            let insured = rng.gen_bool(0.5);
            let damaged = rng.gen_bool(0.5);
            let vehicle_age = ["< 1 Year", "1-2 Year", "> 2 Years"][rng.gen_range(0..3)];
            let p_interest = if !insured && damaged { 0.85 } else { 0.05 };
            vec![
                (idx + 1).to_string(),
                if rng.gen_bool(0.55) { "Male" } else { "Female" }.to_owned(),
                rng.gen_range(20..80_u32).to_string(),
                u8::from(rng.gen_bool(0.98)).to_string(),
                format!("{:.1}", f64::from(rng.gen_range(0..53_i32))),
                u8::from(insured).to_string(),
                vehicle_age.to_owned(),
                if damaged { "Yes" } else { "No" }.to_owned(),
                format!("{:.1}", rng.gen_range(2630.0..80000.0_f64)),
                format!("{:.1}", f64::from(rng.gen_range(1..160_i32))),
                rng.gen_range(10..300_u32).to_string(),
                u8::from(rng.gen_bool(p_interest)).to_string(),
            ]
        })
        .collect();
    RecordSet::new(COLUMNS.iter().map(|c| (*c).to_owned()).collect(), data)
        .expect("fixture rows match header")
}

/// Writes [`insurance_table`] to `<dir>/insurance.csv`.
pub fn insurance_csv(dir: &Path, rows: usize, seed: u64) -> PathBuf {
    let path = dir.join("insurance.csv");
    insurance_table(rows, seed)
        .write_csv(&path)
        .expect("fixture csv written");
    path
}

/// Engineered record for the first row of a raw feature table.
pub fn customer_record(table: &RecordSet) -> CustomerRecord {
    let cell = |name: &str| table.column(name).unwrap().next().unwrap().to_owned();
    let number = |name: &str| cell(name).parse::<f64>().unwrap();
    let flag = |name: &str| cell(name).parse::<i64>().unwrap();
    let vehicle_age = cell("Vehicle_Age");
    CustomerRecord {
        gender: i64::from(cell("Gender") == "Male"),
        age: number("Age"),
        driving_license: flag("Driving_License"),
        region_code: number("Region_Code"),
        previously_insured: flag("Previously_Insured"),
        annual_premium: number("Annual_Premium"),
        policy_sales_channel: number("Policy_Sales_Channel"),
        vintage: number("Vintage"),
        vehicle_age_lt_1_year: i64::from(vehicle_age == "< 1 Year"),
        vehicle_age_gt_2_years: i64::from(vehicle_age == "> 2 Years"),
        vehicle_damage_yes: i64::from(cell("Vehicle_Damage") == "Yes"),
    }
}

/// Writes the schema and returns a small, fast configuration rooted at `root`.
pub fn pipeline_config(root: &Path, data: &Path) -> PipelineConfig {
    let schema_path = root.join("schema.toml");
    fs::write(&schema_path, INSURANCE_SCHEMA).expect("schema written");
    let raw = format!(
        r#"
[pipeline]
name = "vinsure-test"
artifact_root = "{artifact}"
log_dir = "{logs}"
schema_path = "{schema}"

[ingestion]
source = {{ kind = "file", path = "{data}" }}
split_ratio = 0.2
random_state = 42

[trainer]
n_estimators = 20
min_samples_split = 7
min_samples_leaf = 6
max_depth = 10
criterion = "entropy"
random_state = 101
expected_accuracy = 0.6

[registry]
bucket = "{bucket}"
key = "model.json"
"#,
        artifact = root.join("artifact").display(),
        logs = root.join("logs").display(),
        schema = schema_path.display(),
        data = data.display(),
        bucket = root.join("registry").display(),
    );
    PipelineConfig::from_toml(&raw).expect("fixture config parses")
}

//! Streaming CSV ingest of canonical household rows.
//!
//! - Header names are matched case-insensitively, BOM-tolerant.
//! - Missing required *columns* fail the whole file (exit code 2).
//! - Bad *rows* are yielded as [`RowError`]s so callers can skip and count them.
//! - Rows are read lazily: memory does not grow with file size.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{
    HouseholdRecord, HousingType, MAX_AGE, RegionCode, RowError, Sex, VulnerabilityLabel,
};
use crate::error::VulnError;
use crate::features::validate;

/// Columns every input file must have.
pub const REQUIRED_COLUMNS: [&str; 11] = [
    "age",
    "sex",
    "education",
    "family_income",
    "household_size",
    "disability",
    "employment",
    "housing_type",
    "water_access",
    "sewage_access",
    "benefit",
];

/// One successfully parsed data row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub line: u64,
    pub record: HouseholdRecord,
    /// Ground-truth label, when the file has a `label` column and the cell is filled.
    pub label: Option<VulnerabilityLabel>,
}

pub struct HouseholdReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    header_map: HashMap<String, usize>,
    line: u64,
}

impl HouseholdReader<File> {
    pub fn open(path: &Path) -> Result<Self, VulnError> {
        let file = File::open(path).map_err(|e| {
            VulnError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open CSV '{}': {e}", path.display()),
            ))
        })?;
        Self::new(file)
    }
}

impl<R: Read> HouseholdReader<R> {
    pub fn new(reader: R) -> Result<Self, VulnError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let header_map = build_header_map(&headers);

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !header_map.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(VulnError::validation(
                "header",
                format!("missing required column(s): {}", missing.join(", ")),
            ));
        }

        Ok(Self {
            records: reader.into_records(),
            header_map,
            line: 1,
        })
    }

    pub fn has_label_column(&self) -> bool {
        self.header_map.contains_key("label")
    }

    pub fn has_region_column(&self) -> bool {
        self.header_map.contains_key("region")
    }
}

impl<R: Read> Iterator for HouseholdReader<R> {
    type Item = Result<ParsedRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.records.next()?;
        self.line += 1;
        let line = self.line;
        Some(match result {
            Ok(record) => parse_row(&record, &self.header_map)
                .map(|(record, label)| ParsedRow { line, record, label })
                .map_err(|message| RowError { line, message }),
            Err(e) => Err(RowError {
                line,
                message: format!("CSV parse error: {e}"),
            }),
        })
    }
}

/// Whole-file load for training: parsed, validated rows plus the rows skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadedHouseholds {
    pub records: Vec<HouseholdRecord>,
    pub labels: Vec<Option<VulnerabilityLabel>>,
    pub row_errors: Vec<RowError>,
    pub rows_read: u64,
}

pub fn load_households(path: &Path) -> Result<LoadedHouseholds, VulnError> {
    collect_households(HouseholdReader::open(path)?)
}

pub fn collect_households<R: Read>(reader: HouseholdReader<R>) -> Result<LoadedHouseholds, VulnError> {
    let mut out = LoadedHouseholds::default();
    for row in reader {
        out.rows_read += 1;
        match row {
            Ok(row) => match validate(&row.record) {
                Ok(_) => {
                    out.records.push(row.record);
                    out.labels.push(row.label);
                }
                Err(e) => out.row_errors.push(RowError {
                    line: row.line,
                    message: e.to_string(),
                }),
            },
            Err(e) => out.row_errors.push(e),
        }
    }
    if out.records.is_empty() {
        return Err(VulnError::InsufficientData(format!(
            "no valid household rows ({} read, {} rejected)",
            out.rows_read,
            out.row_errors.len()
        )));
    }
    Ok(out)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, key: &str) -> Option<&'a str> {
    let idx = *header_map.get(key)?;
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn get_required<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, key: &str) -> Result<&'a str, String> {
    get_optional(record, header_map, key).ok_or_else(|| format!("missing `{key}` value"))
}

fn parse_number(raw: &str, key: &str) -> Result<f64, String> {
    let v = raw
        .parse::<f64>()
        .or_else(|_| raw.replace(',', ".").parse::<f64>())
        .map_err(|_| format!("invalid `{key}` value '{raw}'"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("non-finite `{key}` value"))
    }
}

/// Whole numbers, tolerating a trailing `.0` from spreadsheet exports.
fn parse_whole(raw: &str, key: &str, max: f64) -> Result<u64, String> {
    let v = parse_number(raw, key)?;
    if v.fract() != 0.0 || v < 0.0 || v > max {
        return Err(format!("`{key}` must be a whole number in [0, {max}], got '{raw}'"));
    }
    Ok(v as u64)
}

fn parse_flag(raw: &str, key: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" | "s" | "sim" => Ok(true),
        "0" | "0.0" | "false" | "no" | "n" | "nao" | "não" => Ok(false),
        _ => Err(format!("invalid `{key}` flag '{raw}'")),
    }
}

fn parse_housing(raw: &str) -> Result<HousingType, String> {
    if let Ok(code) = parse_whole(raw, "housing_type", 255.0) {
        return HousingType::from_code(code as u8)
            .ok_or_else(|| format!("`housing_type` code must be 1-4, got {code}"));
    }
    HousingType::ALL
        .into_iter()
        .find(|h| format!("{h:?}").eq_ignore_ascii_case(raw))
        .ok_or_else(|| format!("invalid `housing_type` value '{raw}'"))
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
) -> Result<(HouseholdRecord, Option<VulnerabilityLabel>), String> {
    let req = |key: &str| get_required(record, header_map, key);
    let opt = |key: &str| get_optional(record, header_map, key);

    // Range checks for the ordinals live in `features::validate`; only the
    // storage width is enforced here.
    let age = parse_whole(req("age")?, "age", f64::from(MAX_AGE))? as u16;
    let raw_sex = req("sex")?;
    let sex = Sex::parse(raw_sex).ok_or_else(|| format!("invalid `sex` value '{raw_sex}'"))?;
    let education = parse_whole(req("education")?, "education", 255.0)? as u8;
    let family_income = parse_number(req("family_income")?, "family_income")?;
    let household_size = opt("household_size")
        .map(|raw| parse_whole(raw, "household_size", f64::from(u32::MAX)).map(|v| v as u32))
        .transpose()?;
    let employment = parse_whole(req("employment")?, "employment", 255.0)? as u8;

    let label = match opt("label") {
        Some(raw) => Some(VulnerabilityLabel::parse(raw).ok_or_else(|| format!("invalid `label` value '{raw}'"))?),
        None => None,
    };

    let household = HouseholdRecord {
        age,
        sex,
        education,
        family_income,
        household_size,
        disability: parse_flag(req("disability")?, "disability")?,
        employment,
        housing_type: parse_housing(req("housing_type")?)?,
        water_access: parse_flag(req("water_access")?, "water_access")?,
        sewage_access: parse_flag(req("sewage_access")?, "sewage_access")?,
        benefit: parse_flag(req("benefit")?, "benefit")?,
        region: opt("region").and_then(RegionCode::parse),
    };
    Ok((household, label))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const HEADER: &str = "\u{feff}Age,Sex,Education,Family_Income,Household_Size,Disability,Employment,Housing_Type,Water_Access,Sewage_Access,Benefit,Region";

    fn reader(body: &str) -> HouseholdReader<Cursor<Vec<u8>>> {
        HouseholdReader::new(Cursor::new(format!("{HEADER}\n{body}").into_bytes())).unwrap()
    }

    #[test]
    fn parses_reference_row_with_bom_and_mixed_case_headers() {
        let mut r = reader("28,F,0,176,5,1,0,1,1,1,1,3205309.0\n");
        assert!(r.has_region_column());
        assert!(!r.has_label_column());
        let row = r.next().unwrap().unwrap();
        assert_eq!(row.line, 2);
        assert_eq!(row.record.age, 28);
        assert_eq!(row.record.sex, Sex::F);
        assert_eq!(row.record.household_size, Some(5));
        assert!(row.record.disability && row.record.benefit);
        assert_eq!(row.record.housing_type, HousingType::Owned);
        assert_eq!(row.record.region.as_ref().unwrap().as_str(), "3205309");
        assert!(row.label.is_none());
        assert!(r.next().is_none());
    }

    #[test]
    fn bad_rows_become_row_errors_with_line_numbers() {
        let rows: Vec<_> = reader(
            "28,F,0,176,5,1,0,1,1,1,1,\n\
             abc,F,0,176,5,1,0,1,1,1,1,1\n\
             30,X,0,176,5,1,0,1,1,1,1,1\n\
             30,M,0,,5,1,0,1,1,1,1,1\n\
             30,M,0,100,5,maybe,0,1,1,1,1,1\n\
             30,M,0,100,5,1,0,9,1,1,1,1\n",
        )
        .collect();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].as_ref().unwrap().record.region.is_none());
        let lines: Vec<u64> = rows.iter().filter_map(|r| r.as_ref().err()).map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 6, 7]);
        let msg = &rows[3].as_ref().unwrap_err().message;
        assert!(msg.contains("family_income"), "{msg}");
    }

    #[test]
    fn missing_household_size_is_kept_for_validation() {
        let mut r = reader("40,M,3,900,,0,2,2,1,0,0,3550308\n");
        let row = r.next().unwrap().unwrap();
        assert_eq!(row.record.household_size, None);
        assert_eq!(row.record.housing_type, HousingType::Rented);
    }

    #[test]
    fn missing_required_column_fails_the_file() {
        let err = HouseholdReader::new("age,sex\n1,F\n".as_bytes()).err().unwrap();
        assert!(matches!(err, VulnError::Validation { field: "header", .. }));
        assert!(err.to_string().contains("family_income"));
    }

    #[test]
    fn label_column_and_collection() {
        let text = format!(
            "{HEADER},Label\n\
             28,F,0,176,5,1,0,1,1,1,1,3205309,very_high\n\
             28,F,0,176,0,1,0,1,1,1,1,3205309,High\n\
             28,F,0,176,5,1,0,owned,yes,no,1,,\n"
        );
        let r = HouseholdReader::new(text.as_bytes()).unwrap();
        assert!(r.has_label_column());
        let loaded = collect_households(r).unwrap();
        assert_eq!(loaded.rows_read, 3);
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.labels, vec![Some(VulnerabilityLabel::VeryHigh), None]);
        assert_eq!(loaded.row_errors.len(), 1);
        assert_eq!(loaded.row_errors[0].line, 3);
        assert!(!loaded.records[1].sewage_access);
    }
}

//! Reader and writer for the line-oriented instance format.
//!
//! ```text
//! <case-tag> <capacity> <item-count> <confidence-level>
//! <Dalpha>
//! mu_1 mu_2 ... mu_n
//! b_1 b_2 ... b_n
//! ```
//!
//! Capacity and item count are taken from the descriptor line, counted from its end,
//! so extra leading words in the descriptor are tolerated.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{ChancePackError, Result};
use crate::model::Instance;
use crate::uncertainty::UncertaintyCase;

/// Descriptor, risk multiplier, nominal demands, spreads.
const RECORD_COUNT: usize = 4;

/// Parsed view of the descriptor line.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    pub case_tag: String,
    pub capacity: f64,
    pub item_count: usize,
    pub alpha: f64,
}

impl Descriptor {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(malformed(format!(
                "descriptor '{}' needs case, capacity, item count and confidence level",
                line.trim()
            )));
        }
        let n = fields.len();
        Ok(Self {
            case_tag: fields[..n - 3].join(" "),
            capacity: parse_number(fields[n - 3], "capacity")?,
            item_count: fields[n - 2].parse::<usize>().map_err(|err| {
                malformed(format!("item count '{}': {}", fields[n - 2], err))
            })?,
            alpha: parse_number(fields[n - 1], "confidence level")?,
        })
    }

    /// Uncertainty case named by the tag, if it is a known one.
    pub fn case(&self) -> Option<UncertaintyCase> {
        self.case_tag.parse().ok()
    }

    /// Canonical descriptor line.
    pub fn render(&self) -> String {
        format!(
            "{} {} {} {}",
            self.case_tag, self.capacity, self.item_count, self.alpha
        )
    }
}

/// Parses instance text; validation follows `Instance::new`.
///
/// Records are taken by position. Trailing blank lines are ignored; a missing or blank
/// demand record reads as zero values, so the declared item count decides whether it is
/// acceptable.
pub fn parse_instance(text: &str) -> Result<Instance> {
    let mut records: Vec<&str> = text.lines().collect();
    while records.last().is_some_and(|line| line.trim().is_empty()) {
        records.pop();
    }
    if records.len() > RECORD_COUNT {
        return Err(malformed(format!(
            "expected {} records but found {}",
            RECORD_COUNT,
            records.len()
        )));
    }

    let descriptor_line = records
        .first()
        .ok_or_else(|| malformed("missing descriptor line"))?;
    let descriptor = Descriptor::parse(descriptor_line)?;

    let dalpha_line = records
        .get(1)
        .ok_or_else(|| malformed("missing risk multiplier line"))?;
    let dalpha = parse_number(dalpha_line.trim(), "risk multiplier")?;

    let mus = parse_vector(records.get(2).copied(), "nominal demand", descriptor.item_count)?;
    let bs = parse_vector(records.get(3).copied(), "spread", descriptor.item_count)?;

    Instance::new(descriptor_line.trim(), descriptor.capacity, dalpha, mus, bs)
}

/// Reads and parses an instance file.
pub fn read_instance(path: impl AsRef<Path>) -> Result<Instance> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|err| ChancePackError::io(path, err))?;
    let instance = parse_instance(&text)?;
    tracing::debug!(
        path = %path.display(),
        items = instance.len(),
        capacity = instance.capacity(),
        "instance loaded"
    );
    Ok(instance)
}

/// Renders an instance in the file format (values followed by a space, one record per line).
pub fn format_instance(instance: &Instance) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", instance.descriptor());
    let _ = writeln!(out, "{}", instance.dalpha());
    for item in instance.items() {
        let _ = write!(out, "{} ", item.mu);
    }
    out.push('\n');
    for item in instance.items() {
        let _ = write!(out, "{} ", item.b);
    }
    out.push('\n');
    out
}

/// Writes an instance file, failing if the file already exists.
pub fn write_instance(path: impl AsRef<Path>, instance: &Instance) -> Result<()> {
    use std::io::Write;

    let path = path.as_ref();
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| ChancePackError::io(path, err))?;
    file.write_all(format_instance(instance).as_bytes())
        .map_err(|err| ChancePackError::io(path, err))
}

fn parse_vector(line: Option<&str>, what: &str, expected: usize) -> Result<Vec<f64>> {
    let values = line
        .unwrap_or_default()
        .split_whitespace()
        .map(|raw| parse_number(raw, what))
        .collect::<Result<Vec<_>>>()?;
    if values.len() != expected {
        return Err(malformed(format!(
            "descriptor declares {} items but {} {} values were given",
            expected,
            values.len(),
            what
        )));
    }
    Ok(values)
}

fn parse_number(raw: &str, what: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|err| malformed(format!("{} '{}': {}", what, raw, err)))
}

fn malformed(details: impl Into<String>) -> ChancePackError {
    ChancePackError::MalformedInstance(details.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "g 10 3 0.9\n1.0\n4 4 4 \n1 1 1 \n";

    #[test]
    fn parses_sample_instance() {
        let instance = parse_instance(SAMPLE).unwrap();
        assert_eq!(instance.descriptor(), "g 10 3 0.9");
        assert_eq!(instance.capacity(), 10.0);
        assert_eq!(instance.dalpha(), 1.0);
        assert_eq!(instance.len(), 3);
        assert_eq!(instance.item(2).mu, 4.0);
        assert_eq!(instance.item(2).b, 1.0);
    }

    #[test]
    fn descriptor_fields_are_counted_from_the_end() {
        let descriptor = Descriptor::parse("d 72 500 0.95").unwrap();
        assert_eq!(descriptor.case(), Some(UncertaintyCase::DistributionallyRobust));
        assert_eq!(descriptor.capacity, 72.0);
        assert_eq!(descriptor.item_count, 500);
        assert_eq!(descriptor.alpha, 0.95);
        assert_eq!(descriptor.render(), "d 72 500 0.95");

        let extended = Descriptor::parse("cloud g 72 10 0.6").unwrap();
        assert_eq!(extended.case_tag, "cloud g");
        assert_eq!(extended.case(), None);
    }

    #[test]
    fn rejects_missing_records() {
        let err = parse_instance("g 10 3 0.9\n1.0\n4 4 4\n").unwrap_err();
        assert!(matches!(err, ChancePackError::MalformedInstance(_)));
        assert!(parse_instance("").is_err());
    }

    #[test]
    fn rejects_count_mismatch() {
        let err = parse_instance("g 10 3 0.9\n1.0\n4 4\n1 1 1\n").unwrap_err();
        assert!(err.to_string().contains("declares 3 items"));
    }

    #[test]
    fn rejects_garbage_numbers() {
        assert!(parse_instance("g 10 3 0.9\nabc\n4 4 4\n1 1 1\n").is_err());
        assert!(parse_instance("g 10 x 0.9\n1.0\n4 4 4\n1 1 1\n").is_err());
    }

    #[test]
    fn rejects_unpackable_item_on_load() {
        let err = parse_instance("g 10 2 0.9\n1.0\n4 9.5\n1 1\n").unwrap_err();
        assert!(matches!(err, ChancePackError::InfeasibleItem { index: 1, .. }));
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.cbp");
        let instance = parse_instance(SAMPLE).unwrap();

        write_instance(&path, &instance).unwrap();
        let loaded = read_instance(&path).unwrap();
        assert_eq!(loaded, instance);

        // Existing files are never overwritten.
        assert!(write_instance(&path, &instance).is_err());
    }

    #[test]
    fn empty_instance_reads_back() {
        let instance = Instance::new("g 10 0 0.9", 10.0, 1.0, vec![], vec![]).unwrap();
        let text = format_instance(&instance);
        assert_eq!(text, "g 10 0 0.9\n1\n\n\n");

        let loaded = parse_instance(&text).unwrap();
        assert_eq!(loaded, instance);
        assert!(loaded.is_empty());

        // Demand records may also be left out entirely.
        assert_eq!(parse_instance("g 10 0 0.9\n1\n").unwrap(), instance);
    }

    #[test]
    fn records_are_read_by_position() {
        let err = parse_instance("g 10 1 0.9\n1.0\n\n4\n1\n").unwrap_err();
        assert!(matches!(err, ChancePackError::MalformedInstance(_)));

        let err = parse_instance("g 10 1 0.9\n1.0\n4\n1\n2\n").unwrap_err();
        assert!(err.to_string().contains("expected 4 records"));

        // Trailing blank lines are fine.
        assert_eq!(parse_instance("g 10 1 0.9\n1.0\n4 \n1 \n\n\n").unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_instance("/definitely/not/here.cbp").unwrap_err();
        assert!(matches!(err, ChancePackError::Io { .. }));
    }
}

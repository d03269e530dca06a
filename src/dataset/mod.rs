// Dataset loader
// Reads the merged gardening CSV (plant attribute rows and Q&A pairs) into records


use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::RagError;
use crate::config::DatasetConfig;
use crate::embeddings::normalize_whitespace;

const QUESTION_COLUMN: &str = "question";
const ANSWER_COLUMN: &str = "answer";

/// One row of the knowledge dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    /// Normalized, never empty
    pub text: String,
    pub fields: BTreeMap<String, String>,
}

/// Where a row's text comes from
#[derive(Debug, Clone, Copy)]
enum TextSource {
    Column(usize),
    QuestionAnswer { question: usize, answer: usize },
}

#[derive(Debug)]
struct Layout {
    id: usize,
    text: TextSource,
    fields: Vec<(usize, String)>,
}

impl Layout {
    fn from_headers(headers: &csv::StringRecord, columns: &DatasetConfig) -> Result<Self, RagError> {
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);

        let id = position(&columns.id_column).ok_or_else(|| {
            RagError::data_format(
                None,
                format!("missing identifier column '{}'", columns.id_column),
            )
        })?;

        let text = match (
            position(&columns.text_column),
            position(QUESTION_COLUMN),
            position(ANSWER_COLUMN),
        ) {
            (Some(column), _, _) => TextSource::Column(column),
            (None, Some(question), Some(answer)) => TextSource::QuestionAnswer { question, answer },
            (None, _, _) => {
                return Err(RagError::data_format(
                    None,
                    format!(
                        "missing text column '{}' (or both '{}' and '{}')",
                        columns.text_column, QUESTION_COLUMN, ANSWER_COLUMN
                    ),
                ));
            }
        };

        let used: Vec<usize> = match text {
            TextSource::Column(column) => vec![id, column],
            TextSource::QuestionAnswer { question, answer } => vec![id, question, answer],
        };
        let fields = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !used.contains(i))
            .map(|(i, name)| (i, name.trim().to_string()))
            .collect();

        Ok(Self { id, text, fields })
    }

    fn record(&self, row: usize, raw: &csv::StringRecord) -> Result<Record, RagError> {
        let cell = |index: usize| raw.get(index).unwrap_or_default();

        let id = cell(self.id).trim().to_string();
        if id.is_empty() {
            return Err(RagError::data_format(Some(row), "identifier is empty"));
        }

        let text = match self.text {
            TextSource::Column(column) => normalize_whitespace(cell(column)),
            TextSource::QuestionAnswer { question, answer } => {
                let question = normalize_whitespace(cell(question));
                let answer = normalize_whitespace(cell(answer));
                if question.is_empty() && answer.is_empty() {
                    String::new()
                } else {
                    format!("Question: {}\nAnswer: {}", question, answer)
                }
            }
        };
        if text.is_empty() {
            return Err(RagError::data_format(
                Some(row),
                format!("text is empty for record '{}'", id),
            ));
        }

        let fields = self
            .fields
            .iter()
            .filter_map(|(index, name)| {
                let value = normalize_whitespace(cell(*index));
                (!value.is_empty()).then(|| (name.clone(), value))
            })
            .collect();

        Ok(Record { id, text, fields })
    }
}

/// Load the dataset at `path`
#[inline]
pub fn load_records(path: &Path, columns: &DatasetConfig) -> Result<Vec<Record>, RagError> {
    let file = File::open(path).map_err(|e| {
        RagError::data_format(None, format!("cannot open {}: {}", path.display(), e))
    })?;
    let records = read_records(file, columns)?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse CSV from any reader. Row numbers in errors count data rows from 1.
#[inline]
pub fn read_records<R: Read>(input: R, columns: &DatasetConfig) -> Result<Vec<Record>, RagError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| RagError::data_format(None, format!("unreadable header: {}", e)))?
        .clone();
    let layout = Layout::from_headers(&headers, columns)?;

    let mut records: Vec<Record> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, result) in reader.records().enumerate() {
        let row = index + 1;
        let raw = result.map_err(|e| RagError::data_format(Some(row), e.to_string()))?;
        let record = layout.record(row, &raw)?;

        if let Some(&existing) = positions.get(&record.id) {
            warn!(
                "Duplicate identifier '{}' at row {}; the later row replaces the earlier one",
                record.id, row
            );
            records[existing] = record;
        } else {
            positions.insert(record.id.clone(), records.len());
            records.push(record);
        }
    }

    Ok(records)
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use kira_seqdb::db::SeqDb;
use kira_seqdb::error::KiraError;

/// Metadata store over in-memory tables.
///
/// Search criteria are evaluated with AND; `EQUAL` compares the rendered
/// value (booleans as `TRUE`/`FALSE`) and `FUZZY` is a case-insensitive substring match. Every post is
/// recorded.
#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    posts: Mutex<Vec<(String, Value)>>,
    next_serial: Mutex<u64>,
}

impl MemoryDb {
    pub fn insert(&self, table: &str, record: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(record);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn post_paths(&self) -> Vec<String> {
        self.posts().into_iter().map(|(path, _)| path).collect()
    }

    fn search_rows(&self, table: &str, body: &Value) -> Vec<Value> {
        let criteria: Vec<(String, String, String)> = body["search_criterion"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|criterion| {
                        let mut parts = criterion.splitn(4, ' ');
                        let _level = parts.next()?;
                        let field = parts.next()?.to_string();
                        let op = parts.next()?.to_string();
                        let value = parts.next().unwrap_or_default().to_string();
                        Some((field, op, value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.rows(table)
            .into_iter()
            .filter(|row| {
                criteria.iter().all(|(field, op, value)| {
                    let Some(actual) = rendered(&row[field.as_str()]) else {
                        return false;
                    };
                    match op.as_str() {
                        "EQUAL" => actual == *value,
                        "FUZZY" => actual.to_lowercase().contains(&value.to_lowercase()),
                        _ => false,
                    }
                })
            })
            .collect()
    }

    fn edit(&self, table: &str, id: &str, body: &Value) {
        let id_field = format!("{table}_id");
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return;
        };
        for row in rows.iter_mut() {
            if rendered(&row[id_field.as_str()]).as_deref() != Some(id) {
                continue;
            }
            if let (Some(target), Some(fields)) = (row.as_object_mut(), body[0].as_object()) {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn assign(&self, body: &Value) -> Value {
        let mut replicates = serde_json::Map::new();
        let mut serial = self.next_serial.lock().unwrap();
        for row in body["query"].as_array().into_iter().flatten() {
            let key: String = (1..4)
                .filter_map(|level| row[level][1].as_str())
                .collect();
            if replicates.contains_key(&key) {
                continue;
            }
            *serial += 1;
            self.insert(
                "replicate",
                json!({
                    "replicate_id": *serial,
                    "replicate_ref": format!("SI{:03}", *serial),
                    "label_short": row[2][1],
                }),
            );
            replicates.insert(key, json!({"serial": *serial}));
        }
        json!({"refs": [{}, replicates]})
    }
}

fn rendered(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string().to_uppercase()),
        _ => None,
    }
}

impl SeqDb for MemoryDb {
    fn get(&self, path: &str) -> Result<Value, KiraError> {
        let Some((table, reference)) = path.split_once("/get-ref/") else {
            return Err(KiraError::DbStatus {
                status: 404,
                message: path.to_string(),
            });
        };
        let ref_field = format!("{table}_ref");
        let found = self
            .rows(table)
            .into_iter()
            .find(|row| row[ref_field.as_str()].as_str() == Some(reference));
        Ok(match found {
            Some(record) => json!([[record]]),
            None => json!([[{}]]),
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, KiraError> {
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["assign"] => Ok(self.assign(body)),
            [table] => Ok(Value::Array(self.search_rows(table, body))),
            [table, "new"] => {
                for record in body.as_array().into_iter().flatten() {
                    self.insert(table, record.clone());
                }
                Ok(Value::String("OK".to_string()))
            }
            [table, "edit", id] => {
                self.edit(table, id, body);
                Ok(Value::String("OK".to_string()))
            }
            _ => Err(KiraError::DbStatus {
                status: 404,
                message: path.to_string(),
            }),
        }
    }
}

/// `count` four-line records with colon-tag headers, gzip compressed.
pub fn write_fastq_gz(path: &Path, flowcell: &str, lane: u32, pair: u32, count: usize) {
    let file = fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(fastq_records(flowcell, lane, pair, count).as_bytes())
        .unwrap();
    encoder.finish().unwrap();
}

pub fn fastq_records(flowcell: &str, lane: u32, pair: u32, count: usize) -> String {
    let mut content = String::new();
    for index in 0..count {
        content.push_str(&format!(
            "@{flowcell}:{lane}:1101:{}:2164 {pair}:N:0:GCTCATGA\nACGTACGTAC\n+\nIIIIIIIIII\n",
            1000 + index
        ));
    }
    content
}

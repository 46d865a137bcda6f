// src/report.rs
//! Reporting boundary: structured tables, JSON documents and narratives.
//!
//! Formatting and file I/O belong to the sink. The engine only hands over
//! in-memory values.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

use crate::decision::ClassificationDecision;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Short rows are padded; long rows are cut to the column count.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("| {} |\n", self.columns.join(" | "));
        out.push_str(&format!("|{}\n", "---|".repeat(self.columns.len())));
        for r in &self.rows {
            out.push_str(&format!("| {} |\n", r.join(" | ")));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    Bullets { items: Vec<String> },
    Table { table: Table },
}

/// Human-readable document: headings, paragraphs, bullet lists and tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Narrative {
    pub title: String,
    pub blocks: Vec<Block>,
}

impl Narrative {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            blocks: Vec::new(),
        }
    }

    pub fn heading(mut self, level: u8, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Heading {
            level: level.clamp(2, 6),
            text: text.into(),
        });
        self
    }

    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Paragraph { text: text.into() });
        self
    }

    pub fn bullets<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocks.push(Block::Bullets {
            items: items.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn table(mut self, table: Table) -> Self {
        self.blocks.push(Block::Table { table });
        self
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for b in &self.blocks {
            out.push('\n');
            match b {
                Block::Heading { level, text } => {
                    out.push_str(&format!("{} {}\n", "#".repeat(*level as usize), text));
                }
                Block::Paragraph { text } => {
                    out.push_str(text);
                    out.push('\n');
                }
                Block::Bullets { items } => {
                    for i in items {
                        out.push_str(&format!("- {i}\n"));
                    }
                }
                Block::Table { table } => out.push_str(&table.to_markdown()),
            }
        }
        out
    }
}

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn table(&self, name: &str, table: &Table) -> Result<()>;
    async fn json(&self, name: &str, doc: &Value) -> Result<()>;
    async fn narrative(&self, name: &str, doc: &Narrative) -> Result<()>;
}

/// Keeps every emitted document in memory (tests, embedding).
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: Mutex<Vec<(String, Table)>>,
    pub jsons: Mutex<Vec<(String, Value)>>,
    pub narratives: Mutex<Vec<(String, Narrative)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_named(&self, name: &str) -> Option<Table> {
        find(&self.tables, name)
    }

    pub fn json_named(&self, name: &str) -> Option<Value> {
        find(&self.jsons, name)
    }

    pub fn narrative_named(&self, name: &str) -> Option<Narrative> {
        find(&self.narratives, name)
    }

    /// Names in emission order, all kinds mixed.
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        out.extend(lock(&self.tables).iter().map(|(n, _)| n.clone()));
        out.extend(lock(&self.jsons).iter().map(|(n, _)| n.clone()));
        out.extend(lock(&self.narratives).iter().map(|(n, _)| n.clone()));
        out
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn find<T: Clone>(m: &Mutex<Vec<(String, T)>>, name: &str) -> Option<T> {
    lock(m).iter().rev().find(|(n, _)| n == name).map(|(_, v)| v.clone())
}

#[async_trait::async_trait]
impl ReportSink for MemorySink {
    async fn table(&self, name: &str, table: &Table) -> Result<()> {
        lock(&self.tables).push((name.to_string(), table.clone()));
        Ok(())
    }

    async fn json(&self, name: &str, doc: &Value) -> Result<()> {
        lock(&self.jsons).push((name.to_string(), doc.clone()));
        Ok(())
    }

    async fn narrative(&self, name: &str, doc: &Narrative) -> Result<()> {
        lock(&self.narratives).push((name.to_string(), doc.clone()));
        Ok(())
    }
}

/// Writes narratives and JSON documents to stdout; tables are summarized.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait::async_trait]
impl ReportSink for ConsoleSink {
    async fn table(&self, name: &str, table: &Table) -> Result<()> {
        println!("[{name}] {} rows x {} columns", table.len(), table.columns.len());
        Ok(())
    }

    async fn json(&self, name: &str, doc: &Value) -> Result<()> {
        println!("[{name}]\n{}", serde_json::to_string_pretty(doc)?);
        Ok(())
    }

    async fn narrative(&self, name: &str, doc: &Narrative) -> Result<()> {
        println!("[{name}]\n{}", doc.to_markdown());
        Ok(())
    }
}

pub const DECISION_COLUMNS: [&str; 9] = [
    "item_id",
    "from_category",
    "from_subcategory",
    "to_category",
    "to_subcategory",
    "kind",
    "confidence",
    "reasons",
    "new_bucket",
];

/// QA sample rows.
pub fn decision_table<'a>(decisions: impl IntoIterator<Item = &'a ClassificationDecision>) -> Table {
    let mut t = Table::new(&DECISION_COLUMNS);
    for d in decisions {
        t.push_row(vec![
            d.item_id.clone(),
            d.from_category.clone().unwrap_or_default(),
            d.from_subcategory.clone().unwrap_or_default(),
            d.to_category.clone().unwrap_or_default(),
            d.to_subcategory.clone().unwrap_or_default(),
            d.kind.to_string(),
            format!("{:.2}", d.confidence),
            d.reasons.join("; "),
            d.new_bucket
                .as_ref()
                .map(|nb| format!("{}:{}", nb.kind.as_str(), nb.key))
                .unwrap_or_default(),
        ]);
    }
    t
}

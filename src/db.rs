use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::dedup::{DedupKey, Keyed};
use crate::error::IngestResult;
use crate::parser::sport::Sport;
use crate::parser::CardCandidate;

/// Where cards end up. Each call is its own unit of work.
pub trait CardStore {
    fn insert_cards(&mut self, cards: &[CardCandidate]) -> IngestResult<usize>;
    fn delete_cards(&mut self, ids: &[i64]) -> IngestResult<usize>;
    fn query_cards(&self, filter: &CardFilter) -> IngestResult<Vec<StoredCard>>;
}

/// A persisted card with its row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredCard {
    pub id: i64,
    #[serde(flatten)]
    pub card: CardCandidate,
}

impl Keyed for StoredCard {
    fn dedup_key(&self) -> DedupKey {
        self.card.dedup_key()
    }
}

/// Equality and range filters for card queries. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub set_name: Option<String>,
    pub year: Option<i32>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub sport: Option<Sport>,
}

impl CardFilter {
    pub fn scoped(set_name: Option<String>, year: Option<i32>) -> Self {
        CardFilter {
            set_name,
            year,
            ..Default::default()
        }
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = SqliteStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = SqliteStore {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cards (
                id             INTEGER PRIMARY KEY,
                sport          TEXT NOT NULL,
                year           INTEGER,
                brand          TEXT NOT NULL,
                set_name       TEXT NOT NULL,
                player_name    TEXT NOT NULL,
                card_number    TEXT NOT NULL,
                is_rookie      BOOLEAN NOT NULL DEFAULT 0,
                is_autographed BOOLEAN NOT NULL DEFAULT 0,
                is_patch       BOOLEAN NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_cards_set_year ON cards(set_name, year);
            CREATE INDEX IF NOT EXISTS idx_cards_sport ON cards(sport);
            ",
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn stats(&self) -> Result<Stats> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM cards", [], |r| r.get(0))?;
        let by_sport = self.field_counts(
            "SELECT sport, COUNT(*) FROM cards GROUP BY sport ORDER BY COUNT(*) DESC, sport",
        )?;
        let by_year = self.field_counts(
            "SELECT CAST(year AS TEXT), COUNT(*) FROM cards
             GROUP BY year ORDER BY year IS NULL, year DESC LIMIT 10",
        )?;
        let top_sets = self.field_counts(
            "SELECT set_name, COUNT(*) FROM cards
             GROUP BY set_name ORDER BY COUNT(*) DESC, set_name LIMIT 10",
        )?;
        Ok(Stats {
            total,
            by_sport,
            by_year,
            top_sets,
        })
    }

    fn field_counts(&self, sql: &str) -> Result<Vec<FieldCount>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FieldCount {
                    value: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl CardStore for SqliteStore {
    fn insert_cards(&mut self, cards: &[CardCandidate]) -> IngestResult<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cards
                 (sport, year, brand, set_name, player_name, card_number,
                  is_rookie, is_autographed, is_patch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for c in cards {
                count += stmt.execute(rusqlite::params![
                    c.sport.as_str(),
                    c.year,
                    c.brand,
                    c.set_name,
                    c.player_name,
                    c.card_number,
                    c.is_rookie,
                    c.is_autographed,
                    c.is_patch,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    fn delete_cards(&mut self, ids: &[i64]) -> IngestResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM cards WHERE id IN ({})", placeholders);
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    fn query_cards(&self, filter: &CardFilter) -> IngestResult<Vec<StoredCard>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(s) = &filter.set_name {
            conditions.push(format!("set_name = ?{}", params.len() + 1));
            params.push(Box::new(s.clone()));
        }
        if let Some(y) = filter.year {
            conditions.push(format!("year = ?{}", params.len() + 1));
            params.push(Box::new(y));
        }
        if let Some(y) = filter.year_from {
            conditions.push(format!("year >= ?{}", params.len() + 1));
            params.push(Box::new(y));
        }
        if let Some(y) = filter.year_to {
            conditions.push(format!("year <= ?{}", params.len() + 1));
            params.push(Box::new(y));
        }
        if let Some(s) = filter.sport {
            conditions.push(format!("sport = ?{}", params.len() + 1));
            params.push(Box::new(s.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT id, sport, year, brand, set_name, player_name, card_number,
                    is_rookie, is_autographed, is_patch
             FROM cards{}
             ORDER BY id",
            where_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let sport: String = row.get(1)?;
                Ok(StoredCard {
                    id: row.get(0)?,
                    card: CardCandidate {
                        sport: Sport::parse(&sport),
                        year: row.get(2)?,
                        brand: row.get(3)?,
                        set_name: row.get(4)?,
                        player_name: row.get(5)?,
                        card_number: row.get(6)?,
                        is_rookie: row.get(7)?,
                        is_autographed: row.get(8)?,
                        is_patch: row.get(9)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Stats ──

#[derive(Debug, Clone, Serialize)]
pub struct FieldCount {
    pub value: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total: usize,
    pub by_sport: Vec<FieldCount>,
    pub by_year: Vec<FieldCount>,
    pub top_sets: Vec<FieldCount>,
}

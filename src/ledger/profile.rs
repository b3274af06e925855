//! 用户画像：(category, key) 唯一，写入即 upsert

use rusqlite::{params, OptionalExtension, Row};

use super::{audit, now, Ledger, ProfileCategory, ProfileFact, ProfileSource};
use crate::core::{OfficeError, Result};

fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileFact> {
    Ok(ProfileFact {
        id: row.get("id")?,
        category: row.get("category")?,
        key: row.get("key")?,
        value: row.get("value")?,
        confidence: row.get("confidence")?,
        source: row.get("source")?,
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    /// 写入画像条目；同 (category, key) 已存在时替换 value / confidence / source，created_at 保持不变
    pub fn upsert_profile(
        &self,
        category: ProfileCategory,
        key: &str,
        value: &str,
        confidence: f64,
        source: ProfileSource,
    ) -> Result<ProfileFact> {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Err(OfficeError::Validation("profile key and value are required".into()));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OfficeError::Validation(format!(
                "profile confidence {confidence} outside [0, 1]"
            )));
        }
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO user_profile (category, key, value, confidence, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (category, key) DO UPDATE SET
                     value = excluded.value,
                     confidence = excluded.confidence,
                     source = excluded.source",
                params![category, key, value, confidence, source, now()],
            )?;
            audit(
                &conn,
                "user",
                "profile_updated",
                &format!("{category}.{key} = {value} ({source}, {confidence:.2})"),
            )?;
        }
        self.profile_fact(category, key)?
            .ok_or_else(|| OfficeError::not_found("user_profile", format!("{category}.{key}")))
    }

    pub fn profile_fact(&self, category: ProfileCategory, key: &str) -> Result<Option<ProfileFact>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT * FROM user_profile WHERE category = ?1 AND key = ?2",
                params![category, key],
                fact_from_row,
            )
            .optional()?)
    }

    pub fn profile(&self) -> Result<Vec<ProfileFact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM user_profile ORDER BY category, key")?;
        let rows = stmt.query_map([], fact_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

//! 创意与文章：核心之外的工作产物，共享账本的持久化与审计规则

use rusqlite::{params, OptionalExtension, Row};

use super::{
    audit, check_advance, clamp_limit, ensure_applied, load_status, now, Article, ArticleStatus, Idea,
    IdeaStatus, Ledger,
};
use crate::core::{OfficeError, Result};

fn idea_from_row(row: &Row<'_>) -> rusqlite::Result<Idea> {
    Ok(Idea {
        id: row.get("id")?,
        content: row.get("content")?,
        plan: row.get("plan")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        status: row.get("status")?,
        url: row.get("url")?,
        created_at: row.get("created_at")?,
    })
}

impl Ledger {
    pub fn create_idea(&self, content: &str) -> Result<Idea> {
        let content = content.trim();
        if content.is_empty() {
            return Err(OfficeError::Validation("idea content is empty".into()));
        }
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ideas (content, status, created_at) VALUES (?1, ?2, ?3)",
            params![content, IdeaStatus::Planning, created_at],
        )?;
        let id = conn.last_insert_rowid();
        audit(&conn, "user", "idea_created", &format!("Idea #{id}"))?;
        Ok(Idea {
            id,
            content: content.to_string(),
            plan: None,
            status: IdeaStatus::Planning,
            created_at,
        })
    }

    pub fn idea(&self, id: i64) -> Result<Idea> {
        self.conn()
            .query_row("SELECT * FROM ideas WHERE id = ?1", [id], idea_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("idea", id))
    }

    pub fn ideas(&self, limit: usize) -> Result<Vec<Idea>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM ideas ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map([clamp_limit(limit)], idea_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 写入计划，planning -> planned
    pub fn set_idea_plan(&self, id: i64, plan: &str) -> Result<Idea> {
        self.move_idea(id, IdeaStatus::Planned, Some(plan))
    }

    pub fn advance_idea(&self, id: i64, to: IdeaStatus) -> Result<Idea> {
        self.move_idea(id, to, None)
    }

    fn move_idea(&self, id: i64, to: IdeaStatus, plan: Option<&str>) -> Result<Idea> {
        {
            let conn = self.conn();
            let from: IdeaStatus = load_status(&conn, "ideas", id)?;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE ideas SET status = ?1, plan = COALESCE(?2, plan) WHERE id = ?3 AND status = ?4",
                params![to, plan, id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(&conn, "manager", "idea_status", &format!("Idea #{id}: {from} -> {to}"))?;
        }
        self.idea(id)
    }

    pub fn create_article(&self, title: &str, content: &str) -> Result<Article> {
        let title = title.trim();
        if title.is_empty() {
            return Err(OfficeError::Validation("article title is empty".into()));
        }
        let created_at = now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO articles (title, content, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![title, content, ArticleStatus::Draft, created_at],
        )?;
        let id = conn.last_insert_rowid();
        audit(&conn, "writer", "article_created", &format!("Article #{id} '{title}'"))?;
        Ok(Article {
            id,
            title: title.to_string(),
            content: content.to_string(),
            status: ArticleStatus::Draft,
            url: None,
            created_at,
        })
    }

    pub fn article(&self, id: i64) -> Result<Article> {
        self.conn()
            .query_row("SELECT * FROM articles WHERE id = ?1", [id], article_from_row)
            .optional()?
            .ok_or_else(|| OfficeError::not_found("article", id))
    }

    pub fn articles(&self, status: Option<ArticleStatus>, limit: usize) -> Result<Vec<Article>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM articles WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status, clamp_limit(limit)], article_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 发布文章并记录公开地址，draft -> published
    pub fn publish_article(&self, id: i64, url: &str) -> Result<Article> {
        let to = ArticleStatus::Published;
        {
            let conn = self.conn();
            let from: ArticleStatus = load_status(&conn, "articles", id)?;
            check_advance(id, from, to)?;
            let changed = conn.execute(
                "UPDATE articles SET status = ?1, url = ?2 WHERE id = ?3 AND status = ?4",
                params![to, url, id, from],
            )?;
            ensure_applied(changed, id, from, to)?;
            audit(&conn, "deployer", "article_published", &format!("Article #{id} at {url}"))?;
        }
        self.article(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idea_flow() {
        let ledger = Ledger::open_in_memory().unwrap();
        let idea = ledger.create_idea("Telegram channel digest").unwrap();
        let idea = ledger.set_idea_plan(idea.id, "1. Researcher: ...").unwrap();
        assert_eq!(idea.status, IdeaStatus::Planned);
        assert!(idea.plan.is_some());

        let idea = ledger.advance_idea(idea.id, IdeaStatus::InProgress).unwrap();
        let idea = ledger.advance_idea(idea.id, IdeaStatus::Done).unwrap();
        assert_eq!(idea.plan.as_deref(), Some("1. Researcher: ..."));

        assert!(matches!(
            ledger.advance_idea(idea.id, IdeaStatus::Planning),
            Err(OfficeError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_article_publish_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let article = ledger.create_article("Rust в проде", "# body").unwrap();
        let article = ledger.publish_article(article.id, "https://example.org/articles/1").unwrap();
        assert_eq!(article.status, ArticleStatus::Published);
        assert!(ledger.publish_article(article.id, "https://example.org/x").is_err());
        assert_eq!(ledger.articles(Some(ArticleStatus::Published), 10).unwrap().len(), 1);
    }
}

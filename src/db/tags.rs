//! Tag rows and the file↔tag join table.

use super::Database;
use crate::errors::GatewayResult;
use crate::models::Tag;

const TAG_COLUMNS: &str = "id, user_id, name, color, created_at";

impl Database {
    pub async fn create_tag(&self, user_id: i64, name: &str, color: &str) -> GatewayResult<Tag> {
        let tag = sqlx::query_as::<_, Tag>(&format!(
            "INSERT INTO tags (user_id, name, color)
             VALUES ($1, $2, $3)
             RETURNING {TAG_COLUMNS}",
        ))
        .bind(user_id)
        .bind(name)
        .bind(color)
        .fetch_one(&self.pool)
        .await?;

        Ok(tag)
    }

    pub async fn list_tags(&self, user_id: i64) -> GatewayResult<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = $1 ORDER BY name",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    pub async fn get_tag_by_name(&self, user_id: i64, name: &str) -> GatewayResult<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = $1 AND name = $2",
        ))
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tag)
    }

    pub async fn delete_tag(&self, id: i64) -> GatewayResult<()> {
        sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn add_tag_to_file(&self, file_id: i64, tag_id: i64) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO file_tags (file_id, tag_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(file_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_tag_from_file(&self, file_id: i64, tag_id: i64) -> GatewayResult<()> {
        sqlx::query("DELETE FROM file_tags WHERE file_id = $1 AND tag_id = $2")
            .bind(file_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_tags_for_file(&self, file_id: i64) -> GatewayResult<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT t.id, t.user_id, t.name, t.color, t.created_at
             FROM tags t
             JOIN file_tags ft ON ft.tag_id = t.id
             WHERE ft.file_id = $1
             ORDER BY t.name",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    /// Copy the whole tag set from one file to another. Used by copy, so a
    /// duplicated file keeps its organization.
    pub async fn copy_file_tags(&self, src_file_id: i64, dst_file_id: i64) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO file_tags (file_id, tag_id)
             SELECT $2, tag_id FROM file_tags WHERE file_id = $1
             ON CONFLICT DO NOTHING",
        )
        .bind(src_file_id)
        .bind(dst_file_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

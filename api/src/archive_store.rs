//! Archive Store (4.C): an append-only collection of validated,
//! finalized intelligence records with secondary indexes on
//! `time_archived`, `pub_time`, `max_rate_score` and the three array
//! fields (see migrations/..._create_iih_tables).

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::app::DbPool;
use crate::model::{ArchivedItem, ArchiveRow, NewArchiveRow};
use crate::schema::archive_items;

pub struct ArchiveStore {
    pool: DbPool,
}

impl ArchiveStore {
    pub fn new(pool: DbPool) -> Self {
        ArchiveStore { pool }
    }

    pub async fn insert(&self, item: &ArchivedItem) -> eyre::Result<()> {
        let mut conn = self.pool.get().await?;
        let new_row = NewArchiveRow {
            uuid: item.uuid,
            informant: item.informant.clone(),
            pub_time: item.pub_time,
            event_times: item.time.iter().cloned().map(Some).collect(),
            locations: item.location.iter().cloned().map(Some).collect(),
            peoples: item.people.iter().cloned().map(Some).collect(),
            organizations: item.organization.iter().cloned().map(Some).collect(),
            event_title: item.event_title.clone(),
            event_brief: item.event_brief.clone(),
            event_text: item.event_text.clone(),
            rate: serde_json::to_value(&item.rate).unwrap_or(serde_json::json!({})),
            impact: item.impact.clone(),
            tips: item.tips.clone(),
            raw_data: item.raw_data.clone(),
            submitter: item.submitter.clone(),
            max_rate_class: item.appendix.max_rate_class.clone(),
            max_rate_score: item.appendix.max_rate_score,
            link_items: item.appendix.link_items.iter().cloned().map(Some).collect(),
            parent_item: item.appendix.parent_item,
            time_got: item.appendix.time_got,
            time_post: item.appendix.time_post,
            time_done: item.appendix.time_done,
            time_archived: item.appendix.time_archived.unwrap_or_else(Utc::now),
        };
        diesel::insert_into(archive_items::table)
            .values(&new_row)
            .on_conflict(archive_items::uuid)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get(&self, uuid: Uuid) -> eyre::Result<Option<ArchivedItem>> {
        let mut conn = self.pool.get().await?;
        let row = archive_items::table
            .filter(archive_items::uuid.eq(uuid))
            .select(ArchiveRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(ArchiveRow::into_archived_item))
    }

    pub async fn count_total(&self) -> eyre::Result<i64> {
        let mut conn = self.pool.get().await?;
        let n = archive_items::table.count().get_result(&mut conn).await?;
        Ok(n)
    }

    /// Newest archived UUID, used by the Query Engine as a pagination
    /// anchor.
    pub async fn newest_uuid(&self) -> eyre::Result<Option<Uuid>> {
        let mut conn = self.pool.get().await?;
        let uuid = archive_items::table
            .order(archive_items::time_archived.desc())
            .select(archive_items::uuid)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(uuid)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Appendix;
    use indexmap::IndexMap;

    fn sample(uuid: Uuid) -> ArchivedItem {
        ArchivedItem {
            uuid,
            informant: "inf".into(),
            pub_time: None,
            time: vec![],
            location: vec!["US".into()],
            people: vec![],
            organization: vec![],
            event_title: "title".into(),
            event_brief: "brief".into(),
            event_text: Some("text".into()),
            rate: IndexMap::new(),
            impact: None,
            tips: None,
            raw_data: serde_json::json!({}),
            submitter: "sub".into(),
            appendix: Appendix::default(),
        }
    }

    #[test]
    fn new_archive_row_carries_appendix_fields_through() {
        let item = sample(Uuid::new_v4());
        let row = NewArchiveRow {
            uuid: item.uuid,
            informant: item.informant.clone(),
            pub_time: item.pub_time,
            event_times: vec![],
            locations: item.location.iter().cloned().map(Some).collect(),
            peoples: vec![],
            organizations: vec![],
            event_title: item.event_title.clone(),
            event_brief: item.event_brief.clone(),
            event_text: item.event_text.clone(),
            rate: serde_json::json!({}),
            impact: None,
            tips: None,
            raw_data: item.raw_data.clone(),
            submitter: item.submitter.clone(),
            max_rate_class: None,
            max_rate_score: None,
            link_items: vec![],
            parent_item: None,
            time_got: None,
            time_post: None,
            time_done: None,
            time_archived: Utc::now(),
        };
        assert_eq!(row.locations, vec![Some("US".to_string())]);
        assert_eq!(row.event_text.as_deref(), Some("text"));
    }
}

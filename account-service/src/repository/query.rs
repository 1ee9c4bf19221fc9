use serde::Serialize;

use crate::cache::SortDirection;
use crate::models::{Entity, Partition};

/// Which listing to read and where to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub partition: Option<Partition>,
    pub direction: SortDirection,
    /// `next_cursor` of the previous page; the page starts strictly after it.
    pub cursor: Option<i64>,
    pub limit: usize,
}

impl ListQuery {
    pub fn all(limit: usize) -> Self {
        Self {
            partition: None,
            direction: SortDirection::Ascending,
            cursor: None,
            limit,
        }
    }

    pub fn partition(partition: Partition, limit: usize) -> Self {
        Self {
            partition: Some(partition),
            ..Self::all(limit)
        }
    }

    pub fn descending(mut self) -> Self {
        self.direction = SortDirection::Descending;
        self
    }

    pub fn after(mut self, cursor: Option<i64>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cut a page out of rows already sorted oldest first.
    pub(crate) fn paginate<E: Entity>(&self, rows: Vec<E>) -> Page<E> {
        let mut rows: Vec<E> = match self.direction {
            SortDirection::Ascending => rows,
            SortDirection::Descending => rows.into_iter().rev().collect(),
        };
        if let Some(cursor) = self.cursor {
            rows.retain(|row| match self.direction {
                SortDirection::Ascending => row.listing_score() > cursor,
                SortDirection::Descending => row.listing_score() < cursor,
            });
        }

        let has_more = rows.len() > self.limit;
        rows.truncate(self.limit);
        let next_cursor = if has_more {
            rows.last().map(|row| row.listing_score())
        } else {
            None
        };
        Page {
            items: rows,
            next_cursor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<E> {
    pub items: Vec<E>,
    pub next_cursor: Option<i64>,
}

impl<E> Page<E> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

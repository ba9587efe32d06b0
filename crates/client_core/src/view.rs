//! The locally materialized comment list and the merge rule for change events.

use std::cmp::Ordering;

use shared::{
    domain::{BlogId, Comment, CommentId},
    protocol::ChangeEvent,
};

/// Where an insert for an unseen id lands.
///
/// `Prepend` keeps newest-first only while inserts arrive in creation order.
/// `ByCreatedAt` places each insert by `(created_at, id)` and stays ordered
/// under out-of-order delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertOrdering {
    #[default]
    Prepend,
    ByCreatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    blog_id: BlogId,
    ordering: InsertOrdering,
    comments: Vec<Comment>,
}

impl CommentView {
    pub fn new(blog_id: BlogId, ordering: InsertOrdering) -> Self {
        Self {
            blog_id,
            ordering,
            comments: Vec::new(),
        }
    }

    /// Builds a view from a full fetch. Rows for other blogs and repeated ids
    /// are dropped; the first occurrence of an id wins.
    pub fn from_snapshot(blog_id: BlogId, ordering: InsertOrdering, rows: Vec<Comment>) -> Self {
        let mut view = Self::new(blog_id, ordering);
        view.replace_all(rows);
        view
    }

    pub fn replace_all(&mut self, rows: Vec<Comment>) {
        let mut comments: Vec<Comment> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.blog_id != self.blog_id || comments.iter().any(|c| c.id == row.id) {
                continue;
            }
            comments.push(row);
        }
        if self.ordering == InsertOrdering::ByCreatedAt {
            comments.sort_by(newest_first);
        }
        self.comments = comments;
    }

    pub fn clear(&mut self) {
        self.comments.clear();
    }

    pub fn blog_id(&self) -> &BlogId {
        &self.blog_id
    }

    pub fn ordering(&self) -> InsertOrdering {
        self.ordering
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn get(&self, id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn ids(&self) -> Vec<CommentId> {
        self.comments.iter().map(|c| c.id).collect()
    }

    /// Merges one event in place. Returns whether the view changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.blog_id() != &self.blog_id {
            return false;
        }
        match event {
            ChangeEvent::Insert { new } => match self.position(new.id) {
                Some(index) => self.replace_at(index, new),
                None => {
                    let index = match self.ordering {
                        InsertOrdering::Prepend => 0,
                        InsertOrdering::ByCreatedAt => self.sorted_slot(new),
                    };
                    self.comments.insert(index, new.clone());
                    true
                }
            },
            ChangeEvent::Update { new } => match self.position(new.id) {
                Some(index) => self.replace_at(index, new),
                None => false,
            },
            ChangeEvent::Delete { old } => match self.position(old.id) {
                Some(index) => {
                    self.comments.remove(index);
                    true
                }
                None => false,
            },
        }
    }

    fn position(&self, id: CommentId) -> Option<usize> {
        self.comments.iter().position(|c| c.id == id)
    }

    fn replace_at(&mut self, index: usize, row: &Comment) -> bool {
        if self.comments[index] == *row {
            return false;
        }
        if self.ordering == InsertOrdering::ByCreatedAt
            && self.comments[index].created_at != row.created_at
        {
            self.comments.remove(index);
            let slot = self.sorted_slot(row);
            self.comments.insert(slot, row.clone());
        } else {
            self.comments[index] = row.clone();
        }
        true
    }

    fn sorted_slot(&self, row: &Comment) -> usize {
        self.comments
            .iter()
            .position(|existing| newest_first(row, existing) != Ordering::Greater)
            .unwrap_or(self.comments.len())
    }
}

/// Pure merge of one change event into a view.
pub fn reconcile(view: &CommentView, event: &ChangeEvent) -> CommentView {
    let mut next = view.clone();
    next.apply(event);
    next
}

fn newest_first(a: &Comment, b: &Comment) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.0.cmp(&a.id.0))
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;

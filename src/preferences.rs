use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::engine::{EngineError, validate_user};
use crate::model::{Category, UserPreferences};
use crate::observability::record_operation;
use crate::store::TimeslotRepository;

/// Per-user category subscriptions.
#[derive(Clone)]
pub struct PreferenceBook {
    repo: Arc<dyn TimeslotRepository>,
}

impl PreferenceBook {
    pub fn new(repo: Arc<dyn TimeslotRepository>) -> Self {
        Self { repo }
    }

    /// Saved categories for `user_id`; empty if nothing was ever saved.
    pub async fn get(&self, user_id: &str) -> Result<BTreeSet<Category>, EngineError> {
        validate_user(user_id)?;
        Ok(self
            .repo
            .get_preferences(user_id)
            .await?
            .map(|p| p.categories)
            .unwrap_or_default())
    }

    /// Replace the user's saved set wholesale.
    pub async fn save(
        &self,
        user_id: &str,
        categories: impl IntoIterator<Item = Category>,
    ) -> Result<BTreeSet<Category>, EngineError> {
        let started = Instant::now();
        let result = self.save_inner(user_id, categories.into_iter().collect()).await;
        record_operation("save_preferences", started, &result);
        result
    }

    async fn save_inner(
        &self,
        user_id: &str,
        categories: BTreeSet<Category>,
    ) -> Result<BTreeSet<Category>, EngineError> {
        validate_user(user_id)?;
        self.repo
            .put_preferences(UserPreferences {
                user_id: user_id.to_string(),
                categories: categories.clone(),
            })
            .await?;
        debug!("{user_id} saved {} preferred categories", categories.len());
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn book() -> PreferenceBook {
        PreferenceBook::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn unknown_user_has_no_preferences() {
        assert!(book().get("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_replaces_rather_than_merges() {
        let prefs = book();
        prefs
            .save("u1", [Category::Movies, Category::ComedyShows])
            .await
            .unwrap();
        let saved = prefs.save("u1", [Category::Other, Category::Other]).await.unwrap();
        assert_eq!(saved, BTreeSet::from([Category::Other]));
        assert_eq!(prefs.get("u1").await.unwrap(), BTreeSet::from([Category::Other]));

        prefs.save("u1", Vec::new()).await.unwrap();
        assert!(prefs.get("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_blank_user() {
        let prefs = book();
        assert!(matches!(
            prefs.save(" ", [Category::Movies]).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(prefs.get("").await, Err(EngineError::Validation(_))));
    }
}

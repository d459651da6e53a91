//! Tracks page targets and the flattened CDP sessions attached to them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
}

impl TargetContext {
    pub fn is_attached(&self) -> bool {
        self.cdp_session.is_some()
    }
}

#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        self.pages.insert(
            page,
            TargetContext {
                session_id: session,
                target_id,
                cdp_session,
                recent_url: None,
            },
        );
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn pages(&self) -> Vec<PageId> {
        self.pages.iter().map(|kv| *kv.key()).collect()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn recent_url(&self, page: &PageId) -> Option<String> {
        self.pages.get(page).and_then(|entry| entry.recent_url.clone())
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn clear(&self) {
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_session_and_url() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), Some("t1".into()), None);
        assert!(!registry.get(&page).expect("context").is_attached());

        registry.set_cdp_session(&page, "s1".into());
        registry.set_recent_url(&page, "https://devenvizom.oizom.com/#/login".into());
        assert_eq!(registry.cdp_session(&page).as_deref(), Some("s1"));
        assert_eq!(
            registry.recent_url(&page).as_deref(),
            Some("https://devenvizom.oizom.com/#/login")
        );

        registry.remove_page(&page);
        assert!(registry.get(&page).is_none());
        assert!(registry.pages().is_empty());
    }
}

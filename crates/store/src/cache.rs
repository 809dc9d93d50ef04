use rustc_hash::FxHashSet;
use serde::Serialize;
use tagscope_core::{Resource, ResourceKey, ResultPage};

/// Displayed results plus the detail panel state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultCache {
    pub resources: Vec<Resource>,
    /// Total matches reported by the last fresh fetch.
    pub count: u64,
    pub current_resource: Option<Resource>,
    pub detail_visible: bool,
}

impl ResultCache {
    /// Fresh fetch: drop everything displayed and take the page as-is.
    pub fn replace(&mut self, page: ResultPage) {
        self.resources = page.resources;
        self.count = page.count;
    }

    /// Next page: append resources not already present, keeping order. Returns how many were added.
    pub fn append(&mut self, page: ResultPage) -> usize {
        let mut seen: FxHashSet<ResourceKey> = self.resources.iter().map(Resource::key).collect();
        let before = self.resources.len();
        for r in page.resources {
            if seen.insert(r.key()) {
                self.resources.push(r);
            }
        }
        self.resources.len() - before
    }

    pub fn select_resource(&mut self, resource: Resource) {
        self.current_resource = Some(resource);
        self.detail_visible = true;
    }

    pub fn close_detail(&mut self) {
        self.current_resource = None;
        self.detail_visible = false;
    }

    pub fn len(&self) -> usize { self.resources.len() }
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(ids: &[&str], count: u64) -> ResultPage {
        ResultPage { resources: ids.iter().map(|id| Resource::new("ec2.Instance", *id, "us-east-1")).collect(), count }
    }

    fn ids(c: &ResultCache) -> Vec<&str> { c.resources.iter().map(|r| r.id.as_str()).collect() }

    #[test]
    fn append_dedups_and_preserves_order() {
        let mut c = ResultCache::default();
        c.replace(page(&["A", "B", "C"], 4));
        assert_eq!(c.append(page(&["C", "D"], 4)), 1);
        assert_eq!(ids(&c), vec!["A", "B", "C", "D"]);
        assert_eq!(c.count, 4);
    }

    #[test]
    fn same_id_in_another_region_is_distinct() {
        let mut c = ResultCache::default();
        c.replace(page(&["A"], 2));
        let other = ResultPage { resources: vec![Resource::new("ec2.Instance", "A", "eu-west-1")], count: 2 };
        assert_eq!(c.append(other), 1);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn detail_survives_append_and_replace() {
        let mut c = ResultCache::default();
        c.replace(page(&["A"], 1));
        c.select_resource(c.resources[0].clone());
        c.append(page(&["B"], 1));
        assert!(c.detail_visible);
        c.replace(page(&["X"], 1));
        assert_eq!(c.current_resource.as_ref().map(|r| r.id.as_str()), Some("A"));
        c.close_detail();
        assert!(!c.detail_visible);
        assert!(c.current_resource.is_none());
    }
}

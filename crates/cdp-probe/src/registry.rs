//! Live frame-tree registry, fed by `Page.frame*` events. The network
//! observer walks it to attribute framed responses to the top document.

use dashmap::DashMap;

#[derive(Clone, Debug, Default)]
struct FrameInfo {
    url: Option<String>,
    parent: Option<String>,
}

#[derive(Debug, Default)]
pub struct FrameRegistry {
    frames: DashMap<String, FrameInfo>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_attached(&self, frame_id: &str, parent_id: Option<&str>) {
        let mut entry = self.frames.entry(frame_id.to_string()).or_default();
        if parent_id.is_some() {
            entry.parent = parent_id.map(str::to_string);
        }
    }

    pub fn on_navigated(&self, frame_id: &str, url: &str, parent_id: Option<&str>) {
        let mut entry = self.frames.entry(frame_id.to_string()).or_default();
        entry.url = Some(url.to_string());
        if parent_id.is_some() {
            entry.parent = parent_id.map(str::to_string);
        }
    }

    pub fn on_detached(&self, frame_id: &str) {
        self.frames.remove(frame_id);
    }

    pub fn frame_url(&self, frame_id: &str) -> Option<String> {
        self.frames.get(frame_id)?.url.clone()
    }

    /// Walks up the parent chain; bounded in case of a cycle in stale data.
    pub fn top_frame_url(&self, frame_id: &str) -> Option<String> {
        let mut current = frame_id.to_string();
        for _ in 0..32 {
            let info = self.frames.get(&current)?.clone();
            match info.parent {
                Some(parent) => current = parent,
                None => return info.url,
            }
        }
        None
    }

    /// URLs of all currently known frames, for the storage snapshot walk.
    pub fn frame_urls(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|entry| entry.value().url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_to_the_top_frame() {
        let registry = FrameRegistry::new();
        registry.on_navigated("root", "https://example.com/", None);
        registry.on_attached("child", Some("root"));
        registry.on_navigated("child", "https://widget.example/frame", Some("root"));

        assert_eq!(
            registry.top_frame_url("child").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            registry.frame_url("child").as_deref(),
            Some("https://widget.example/frame")
        );
    }

    #[test]
    fn detached_frames_disappear() {
        let registry = FrameRegistry::new();
        registry.on_navigated("root", "https://example.com/", None);
        registry.on_detached("root");
        assert_eq!(registry.top_frame_url("root"), None);
    }

    #[test]
    fn unknown_frames_resolve_to_none() {
        let registry = FrameRegistry::new();
        assert_eq!(registry.top_frame_url("ghost"), None);
    }
}

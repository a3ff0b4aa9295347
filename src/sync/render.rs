//! Re-render coalescing.
//!
//! At most one render task exists at a time. Requests made before it reads
//! the state are merged into it. A request made while it is drawing marks the
//! view dirty, and the same task draws once more afterwards, so the last
//! state is always the last one painted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{MemberRecord, Section};

/// Consumer of reconciled records (the section views).
pub trait SectionRenderer: Send + Sync {
    fn render(&self, section: Section, record: &MemberRecord);
}

pub struct RenderCoalescer {
    renderer: Arc<dyn SectionRenderer>,
    pending: Arc<AtomicBool>,
    dirty: Arc<AtomicBool>,
    renders: Arc<AtomicU64>,
}

impl RenderCoalescer {
    pub fn new(renderer: Arc<dyn SectionRenderer>) -> Self {
        Self {
            renderer,
            pending: Arc::new(AtomicBool::new(false)),
            dirty: Arc::new(AtomicBool::new(false)),
            renders: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a render. `target` yields the section and record to draw
    /// (or nothing to draw) and is called each time the task draws.
    ///
    /// Returns `false` when the request was merged into a render task that
    /// already exists.
    pub fn request<T, F>(&self, target: T) -> bool
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = Option<(Section, MemberRecord)>> + Send + 'static,
    {
        self.dirty.store(true, Ordering::SeqCst);
        if self.pending.swap(true, Ordering::SeqCst) {
            tracing::trace!("Render already pending, merging request");
            return false;
        }

        let renderer = Arc::clone(&self.renderer);
        let pending = Arc::clone(&self.pending);
        let dirty = Arc::clone(&self.dirty);
        let renders = Arc::clone(&self.renders);
        tokio::spawn(async move {
            // Let the current burst of updates land first.
            tokio::task::yield_now().await;
            loop {
                dirty.store(false, Ordering::SeqCst);
                if let Some((section, record)) = target().await {
                    renderer.render(section, &record);
                    renders.fetch_add(1, Ordering::Relaxed);
                }
                if dirty.load(Ordering::SeqCst) {
                    continue;
                }
                pending.store(false, Ordering::SeqCst);
                // A request that saw `pending` still set right before the
                // release is ours to serve, unless a new task took it.
                if !dirty.load(Ordering::SeqCst) || pending.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
        true
    }

    /// Renders performed so far.
    pub fn count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl SectionRenderer for Recorder {
        fn render(&self, _section: Section, record: &MemberRecord) {
            self.0.lock().unwrap().push(record.name.clone());
        }
    }

    fn record(name: &str) -> MemberRecord {
        serde_json::from_value(serde_json::json!({ "id": "m1", "nome": name })).unwrap()
    }

    #[tokio::test]
    async fn test_overlapping_requests_are_merged() {
        let recorder = Arc::new(Recorder::default());
        let coalescer = RenderCoalescer::new(recorder.clone());

        let first = coalescer.request(|| async { Some((Section::Medical, record("a"))) });
        let second = coalescer.request(|| async { Some((Section::Medical, record("b"))) });
        assert!(first);
        assert!(!second);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(coalescer.count(), 1);

        assert!(coalescer.request(|| async { Some((Section::Medical, record("c"))) }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coalescer.count(), 2);
    }

    #[tokio::test]
    async fn test_nothing_to_draw_is_not_counted() {
        let recorder = Arc::new(Recorder::default());
        let coalescer = RenderCoalescer::new(recorder.clone());

        assert!(coalescer.request(|| async { None }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coalescer.count(), 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    struct SlowRecorder(Mutex<Vec<String>>);

    impl SectionRenderer for SlowRecorder {
        fn render(&self, _section: Section, record: &MemberRecord) {
            std::thread::sleep(Duration::from_millis(50));
            self.0.lock().unwrap().push(record.name.clone());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_during_render_is_painted_afterwards() {
        let recorder = Arc::new(SlowRecorder(Mutex::new(Vec::new())));
        let coalescer = RenderCoalescer::new(recorder.clone());
        let current = Arc::new(Mutex::new("v1".to_string()));

        let target = {
            let current = Arc::clone(&current);
            move || {
                let name = current.lock().unwrap().clone();
                async move { Some((Section::Medical, record(&name))) }
            }
        };

        assert!(coalescer.request(target.clone()));
        tokio::time::sleep(Duration::from_millis(15)).await;
        *current.lock().unwrap() = "v2".to_string();
        assert!(!coalescer.request(target));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let painted = recorder.0.lock().unwrap().clone();
        assert_eq!(painted, vec!["v1".to_string(), "v2".to_string()]);
        assert_eq!(coalescer.count(), 2);
    }
}

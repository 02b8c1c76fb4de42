// src/models.rs

/// A point-in-time, read-only view of one download task.
///
/// The renderer works exclusively on snapshots so it can never mutate a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSnapshot {
    /// Resolved file name. Empty until the server has answered.
    pub file_name: String,
    pub bytes_read: u64,
    /// Expected size in bytes; 0 when the server did not say.
    pub total_size: u64,
    /// Error text to show the user. `None` while running and after a clean finish.
    pub error: Option<String>,
    pub eta: String,
    pub speed: String,
    pub finished: bool,
}

impl TaskSnapshot {
    /// Fraction of the file downloaded, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        if self.total_size == 0 {
            return None;
        }
        Some((self.bytes_read as f64 / self.total_size as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_needs_a_total() {
        let mut snapshot = TaskSnapshot {
            bytes_read: 50,
            ..Default::default()
        };
        assert_eq!(snapshot.progress(), None);

        snapshot.total_size = 200;
        assert_eq!(snapshot.progress(), Some(0.25));

        snapshot.bytes_read = 400;
        assert_eq!(snapshot.progress(), Some(1.0));
    }
}

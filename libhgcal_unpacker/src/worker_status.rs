/// State of the file a worker reports on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    /// Reading
    #[default]
    CYAN,
    /// Finished, but events were skipped or ECON-Ds were faulty
    MAGENTA,
    /// Failed
    RED,
    /// Finished cleanly
    GREEN,
}

/// Progress message sent by a worker while it reads a raw file
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    /// Position of the file in the configured raw file list
    pub file_number: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, file_number: usize, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            file_number,
            worker_id,
            color,
        }
    }
}

/// Color of a worker's progress bar: one per kind of work, green once a file is done
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    GREEN,
}

impl BarColor {
    /// Name understood by progress bar templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CYAN => "cyan",
            Self::MAGENTA => "magenta",
            Self::GREEN => "green",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub task: String,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, task: &str, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            task: task.to_string(),
            worker_id,
            color,
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),
}

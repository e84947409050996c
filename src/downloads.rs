use serde::Serialize;

/// Download lifecycle notice relayed from the host session to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadNotice {
    Progress {
        filename: String,
        received_bytes: u64,
        total_bytes: u64,
        percent: u8,
    },
    Completed {
        filename: String,
        path: String,
    },
    Failed {
        filename: String,
        reason: String,
    },
}

impl DownloadNotice {
    pub fn progress(filename: impl Into<String>, received_bytes: u64, total_bytes: u64) -> Self {
        Self::Progress {
            filename: filename.into(),
            received_bytes,
            total_bytes,
            percent: percent_of(received_bytes, total_bytes),
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            Self::Progress { filename, .. }
            | Self::Completed { filename, .. }
            | Self::Failed { filename, .. } => filename,
        }
    }
}

fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let scaled = (u128::from(received) * 100 + u128::from(total) / 2) / u128::from(total);
    scaled.min(100) as u8
}

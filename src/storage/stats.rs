#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub requests: u64,
    pub bytes_uploaded: u64,
    pub blobs_uploaded: u64,
    pub blobs_deleted: u64,
}

impl StorageStats {
    pub fn new() -> Self {
        StorageStats::default()
    }

    pub fn add_request(&mut self) {
        self.requests += 1;
    }

    pub fn add_upload_part(&mut self, bytes: u64) {
        self.requests += 1;
        self.bytes_uploaded += bytes;
    }

    pub fn add_upload(&mut self) {
        self.blobs_uploaded += 1;
    }

    pub fn add_delete(&mut self) {
        self.requests += 1;
        self.blobs_deleted += 1;
    }
}

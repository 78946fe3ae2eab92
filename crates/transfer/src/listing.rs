use ftm_protocol::codec;
use ftm_protocol::{Command, DirectoryEntry, ListingItem, OBJECT_INDEX};
use tracing::{debug, warn};

use crate::TransferError;
use crate::transport::Transport;

/// Pages through a remote directory one entry per exchange.
pub struct DirectoryLister<'a, T: Transport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> DirectoryLister<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Lists `path`, in the order the device returns entries.
    ///
    /// The first exchange carries the path; each following exchange has no
    /// payload and yields the next entry until the end marker. Any error
    /// discards what was collected so far.
    pub async fn list(&self, path: &str) -> Result<Vec<DirectoryEntry>, TransferError> {
        let request = codec::encode_list_path(path, self.transport.max_frame_length())?;
        debug!(path = %path, "listing directory");

        let mut entries = Vec::new();
        let mut payload = Some(request.as_slice());
        loop {
            let response = self
                .transport
                .invoke(OBJECT_INDEX, Command::DirList.code(), payload, true)
                .await?;
            payload = None;

            match codec::decode_listing_item(&response)? {
                ListingItem::End => break,
                ListingItem::Entry(entry) => entries.push(entry),
                ListingItem::Unknown(kind) => {
                    warn!(path = %path, kind, "skipping listing entry of unknown kind");
                }
            }
        }

        debug!(path = %path, count = entries.len(), "listing complete");
        Ok(entries)
    }
}

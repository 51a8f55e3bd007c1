//! Peer control-socket messages (4-byte codes).
//!
//! Listing-style messages carry a zlib stream after the code.

use super::{Message, empty_message};
use crate::compress::{deflate, inflate};
use crate::constants::CodeWidth;
use crate::error::ProtocolError;
use crate::token::Token;
use crate::types::{FileEntry, Folder, TransferDirection, TransferRejection};
use crate::wire::{Reader, Writer};

const W: CodeWidth = CodeWidth::Four;

/// Compresses the body built by `f` into `w`.
fn write_compressed(
    w: &mut Writer,
    f: impl FnOnce(&mut Writer) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    let mut body = Writer::new();
    f(&mut body)?;
    w.raw(&deflate(&body.into_inner())?);
    Ok(())
}

/// Inflates the rest of the payload and decodes it with `f`.
///
/// The compressed body must be the whole payload, so the outer reader is
/// always drained.
fn read_compressed<T>(
    r: &mut Reader<'_>,
    f: impl FnOnce(&mut Reader<'_>) -> Result<T, ProtocolError>,
) -> Result<T, ProtocolError> {
    let body = inflate(r.rest())?;
    let mut inner = Reader::new(&body);
    f(&mut inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedFileListRequest;

empty_message!(SharedFileListRequest, 4, CodeWidth::Four);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFileListResponse {
    pub folders: Vec<Folder>,
    pub private_folders: Vec<Folder>,
}

impl Message for SharedFileListResponse {
    const CODE: u32 = 5;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        write_compressed(w, |b| {
            b.list(&self.folders, |b, f| f.encode(b));
            b.u32(0);
            if !self.private_folders.is_empty() {
                b.list(&self.private_folders, |b, f| f.encode(b));
            }
            Ok(())
        })
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        read_compressed(r, |b| {
            let folders = b.list(Folder::decode)?;
            let private_folders = b.trailing(|b| {
                if b.is_empty() {
                    return Ok(Vec::new());
                }
                let _unknown = b.u32()?;
                b.optional_list(Folder::decode)
            })?;
            Ok(Self {
                folders,
                private_folders,
            })
        })
    }
}

/// Results for one search, sent by the peer that matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSearchResponse {
    pub username: String,
    pub token: Token,
    pub files: Vec<FileEntry>,
    pub slot_free: bool,
    pub avg_speed: u32,
    pub queue_length: u32,
    pub private_files: Vec<FileEntry>,
}

impl Message for FileSearchResponse {
    const CODE: u32 = 9;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        for f in self.files.iter().chain(&self.private_files) {
            f.validate_for_search()?;
        }
        write_compressed(w, |b| {
            b.str(&self.username)
                .u32(self.token.get())
                .list(&self.files, |b, f| f.encode(b))
                .bool(self.slot_free)
                .u32(self.avg_speed)
                .u32(self.queue_length)
                .u32(0);
            if !self.private_files.is_empty() {
                b.list(&self.private_files, |b, f| f.encode(b));
            }
            Ok(())
        })
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        read_compressed(r, |b| {
            let username = b.string()?;
            let token = Token(b.u32()?);
            let files = b.list(FileEntry::decode)?;
            let slot_free = b.bool()?;
            let avg_speed = b.u32()?;
            let queue_length = b.u32()?;
            let private_files = b.trailing(|b| {
                if b.is_empty() {
                    return Ok(Vec::new());
                }
                let _unknown = b.u32()?;
                b.optional_list(FileEntry::decode)
            })?;
            Ok(Self {
                username,
                token,
                files,
                slot_free,
                avg_speed,
                queue_length,
                private_files,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderContentsRequest {
    pub token: Token,
    pub folder: String,
}

impl Message for FolderContentsRequest {
    const CODE: u32 = 36;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get()).str(&self.folder);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
            folder: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderContentsResponse {
    pub token: Token,
    pub folder: String,
    pub folders: Vec<Folder>,
}

impl Message for FolderContentsResponse {
    const CODE: u32 = 37;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        write_compressed(w, |b| {
            b.u32(self.token.get())
                .str(&self.folder)
                .list(&self.folders, |b, f| f.encode(b));
            Ok(())
        })
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        read_compressed(r, |b| {
            Ok(Self {
                token: Token(b.u32()?),
                folder: b.string()?,
                folders: b.trailing(|b| b.optional_list(Folder::decode))?,
            })
        })
    }
}

/// Opens transfer negotiation for one file.
///
/// `size` is present only when the sender is offering to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub token: Token,
    pub filename: String,
    pub size: Option<u64>,
}

impl Message for TransferRequest {
    const CODE: u32 = 40;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.direction.to_wire())
            .u32(self.token.get())
            .str(&self.filename);
        if self.direction == TransferDirection::Upload {
            w.u64(self.size.unwrap_or(0));
        }
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let direction = TransferDirection::from_wire(r.u32()?)?;
        let token = Token(r.u32()?);
        let filename = r.string()?;
        let size = match direction {
            TransferDirection::Upload => Some(r.u64()?),
            TransferDirection::Download => None,
        };
        Ok(Self {
            direction,
            token,
            filename,
            size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferReply {
    /// `size` accompanies acceptance of a download request.
    Allowed { size: Option<u64> },
    Rejected(TransferRejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub token: Token,
    pub reply: TransferReply,
}

impl TransferResponse {
    pub fn allowed(token: Token) -> Self {
        Self {
            token,
            reply: TransferReply::Allowed { size: None },
        }
    }

    pub fn rejected(token: Token, reason: TransferRejection) -> Self {
        Self {
            token,
            reply: TransferReply::Rejected(reason),
        }
    }
}

impl Message for TransferResponse {
    const CODE: u32 = 41;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get());
        match &self.reply {
            TransferReply::Allowed { size } => {
                w.bool(true);
                if let Some(size) = size {
                    w.u64(*size);
                }
            }
            TransferReply::Rejected(reason) => {
                w.bool(false).str(reason.as_wire());
            }
        }
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let token = Token(r.u32()?);
        let reply = if r.bool()? {
            let size = if r.is_empty() { None } else { Some(r.u64()?) };
            TransferReply::Allowed { size }
        } else {
            // Some clients omit the reason entirely.
            let reason = if r.is_empty() { String::new() } else { r.string()? };
            TransferReply::Rejected(TransferRejection::from_wire(&reason))
        };
        Ok(Self { token, reply })
    }
}

/// A single-filename message.
macro_rules! filename_message {
    ($(#[$meta:meta])* $ty:ident, $code:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ty {
            pub filename: String,
        }

        impl Message for $ty {
            const CODE: u32 = $code;
            const WIDTH: CodeWidth = W;

            fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
                w.str(&self.filename);
                Ok(())
            }

            fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
                Ok(Self {
                    filename: r.string()?,
                })
            }
        }
    };
}

filename_message!(
    /// Asks the peer to queue an upload of `filename` to us.
    QueueUpload,
    43
);
filename_message!(
    /// The peer gave up on an upload it had started.
    UploadFailed,
    46
);
filename_message!(PlaceInQueueRequest, 51);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceInQueueResponse {
    pub filename: String,
    pub place: u32,
}

impl Message for PlaceInQueueResponse {
    const CODE: u32 = 44;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.filename).u32(self.place);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            filename: r.string()?,
            place: r.u32()?,
        })
    }
}

/// The peer refuses to queue `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDenied {
    pub filename: String,
    pub reason: TransferRejection,
}

impl Message for UploadDenied {
    const CODE: u32 = 50;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.filename).str(self.reason.as_wire());
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            filename: r.string()?,
            reason: TransferRejection::from_wire(&r.string()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::types::FileAttribute;

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            filename: name.into(),
            size,
            extension: "mp3".into(),
            attributes: vec![FileAttribute { kind: 0, value: 320 }],
        }
    }

    fn search_response(files: Vec<FileEntry>) -> FileSearchResponse {
        FileSearchResponse {
            username: "bob".into(),
            token: Token(5),
            files,
            slot_free: true,
            avg_speed: 100,
            queue_length: 0,
            private_files: vec![],
        }
    }

    #[test]
    fn search_response_rejects_empty_filename() {
        let msg = search_response(vec![entry("", 10)]);
        assert!(matches!(
            msg.to_frame(),
            Err(ProtocolError::InvalidField {
                field: "filename",
                ..
            })
        ));
    }

    #[test]
    fn search_response_rejects_zero_size() {
        let msg = search_response(vec![entry("a.mp3", 0)]);
        assert!(matches!(
            msg.to_frame(),
            Err(ProtocolError::InvalidField { field: "size", .. })
        ));
    }

    #[test]
    fn search_response_without_private_list() {
        // Older clients stop after the queue length.
        let mut body = Writer::new();
        body.str("bob")
            .u32(5)
            .list(&[entry("a.mp3", 10)], |b, f| f.encode(b))
            .bool(false)
            .u32(1)
            .u32(2);
        let frame = Frame::new(9, deflate(&body.into_inner()).unwrap());
        let decoded = FileSearchResponse::from_frame(&frame).unwrap();
        assert_eq!(decoded.files.len(), 1);
        assert!(decoded.private_files.is_empty());
        assert_eq!(decoded.queue_length, 2);
    }

    #[test]
    fn search_response_with_cut_private_list() {
        let mut body = Writer::new();
        body.str("bob")
            .u32(5)
            .list(&[entry("a.mp3", 10)], |b, f| f.encode(b))
            .bool(true)
            .u32(1)
            .u32(0)
            .u32(0)
            .u32(3);
        let counted_only = body.clone().into_inner();
        // Count of three, then half of the first entry's filename length.
        let partial_entry = {
            let mut b = body;
            b.u8(1).u32(200).raw(&[0, 0]);
            b.into_inner()
        };

        for cut in [counted_only, partial_entry] {
            let frame = Frame::new(9, deflate(&cut).unwrap());
            let decoded = FileSearchResponse::from_frame(&frame).unwrap();
            assert_eq!(decoded.files.len(), 1);
            assert!(decoded.private_files.is_empty());
            assert!(decoded.slot_free);
        }
    }

    #[test]
    fn shared_list_with_cut_private_section() {
        let mut body = Writer::new();
        let folder = Folder {
            path: "music".into(),
            files: vec![entry("a.mp3", 1)],
        };
        body.list(&[folder], |b, f| f.encode(b)).u32(0).u32(2);
        let frame = Frame::new(5, deflate(&body.into_inner()).unwrap());
        let decoded = SharedFileListResponse::from_frame(&frame).unwrap();
        assert_eq!(decoded.folders.len(), 1);
        assert!(decoded.private_folders.is_empty());
    }

    #[test]
    fn transfer_request_upload_carries_size() {
        let msg = TransferRequest {
            direction: TransferDirection::Upload,
            token: Token(1),
            filename: "a".into(),
            size: Some(100),
        };
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.payload.len(), 4 + 4 + 4 + 1 + 8);
        assert_eq!(TransferRequest::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn transfer_response_rejection() {
        let msg = TransferResponse::rejected(Token(3), TransferRejection::Queued);
        let frame = msg.to_frame().unwrap();
        assert_eq!(TransferResponse::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn transfer_response_allowed_is_short() {
        let frame = TransferResponse::allowed(Token(3)).to_frame().unwrap();
        assert_eq!(frame.payload, vec![3, 0, 0, 0, 1]);
    }

    #[test]
    fn upload_denied_maps_reason() {
        let mut w = Writer::new();
        w.str("a.mp3").str("File not shared.");
        let frame = Frame::new(50, w.into_inner());
        let msg = UploadDenied::from_frame(&frame).unwrap();
        assert_eq!(msg.reason, TransferRejection::FileNotShared);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn file() -> impl Strategy<Value = FileEntry> {
            (
                ".+",
                1..u64::MAX,
                "[a-z0-9]{0,4}",
                proptest::collection::vec((any::<u32>(), any::<u32>()), 0..4),
            )
                .prop_map(|(filename, size, extension, attrs)| FileEntry {
                    filename,
                    size,
                    extension,
                    attributes: attrs
                        .into_iter()
                        .map(|(kind, value)| FileAttribute { kind, value })
                        .collect(),
                })
        }

        fn folder() -> impl Strategy<Value = Folder> {
            (".*", proptest::collection::vec(file(), 0..4))
                .prop_map(|(path, files)| Folder { path, files })
        }

        fn roundtrip<M: Message + PartialEq + std::fmt::Debug>(msg: &M) -> Result<(), TestCaseError> {
            let frame = msg.to_frame().unwrap();
            prop_assert_eq!(&M::from_frame(&frame).unwrap(), msg);
            Ok(())
        }

        proptest! {
            #[test]
            fn prop_search_response(
                username in ".*",
                token in any::<u32>(),
                files in proptest::collection::vec(file(), 0..6),
                slot_free in any::<bool>(),
                avg_speed in any::<u32>(),
                queue_length in any::<u32>(),
                private_files in proptest::collection::vec(file(), 0..3),
            ) {
                roundtrip(&FileSearchResponse {
                    username,
                    token: Token(token),
                    files,
                    slot_free,
                    avg_speed,
                    queue_length,
                    private_files,
                })?;
            }

            #[test]
            fn prop_shared_list(
                folders in proptest::collection::vec(folder(), 0..4),
                private_folders in proptest::collection::vec(folder(), 0..2),
            ) {
                roundtrip(&SharedFileListResponse { folders, private_folders })?;
            }

            #[test]
            fn prop_folder_contents(token in any::<u32>(), folder_name in ".*", folders in proptest::collection::vec(folder(), 0..3)) {
                roundtrip(&FolderContentsRequest { token: Token(token), folder: folder_name.clone() })?;
                roundtrip(&FolderContentsResponse { token: Token(token), folder: folder_name, folders })?;
            }

            #[test]
            fn prop_transfer_request(token in any::<u32>(), filename in ".*", size in any::<u64>(), upload in any::<bool>()) {
                let (direction, size) = if upload {
                    (TransferDirection::Upload, Some(size))
                } else {
                    (TransferDirection::Download, None)
                };
                roundtrip(&TransferRequest { direction, token: Token(token), filename, size })?;
            }

            #[test]
            fn prop_transfer_response(token in any::<u32>(), size in proptest::option::of(any::<u64>()), reason in "[A-Za-z .]{1,20}", allowed in any::<bool>()) {
                let reply = if allowed {
                    TransferReply::Allowed { size }
                } else {
                    TransferReply::Rejected(TransferRejection::from_wire(&reason))
                };
                roundtrip(&TransferResponse { token: Token(token), reply })?;
            }

            #[test]
            fn prop_filename_messages(filename in ".*", place in any::<u32>(), reason in "[A-Za-z .]{1,20}") {
                roundtrip(&QueueUpload { filename: filename.clone() })?;
                roundtrip(&UploadFailed { filename: filename.clone() })?;
                roundtrip(&PlaceInQueueRequest { filename: filename.clone() })?;
                roundtrip(&PlaceInQueueResponse { filename: filename.clone(), place })?;
                roundtrip(&UploadDenied { filename, reason: TransferRejection::from_wire(&reason) })?;
            }
        }
    }
}

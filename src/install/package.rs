//! Package header parsing and content-based destination routing.
//!
//! Installable package streams open with a fixed-layout binary preamble:
//! a 4-byte header-size field at offset 0 and a 4-byte certificate-size
//! field at offset 8, each individually padded to a 64-byte boundary,
//! followed deeper in the stream by an 8-byte big-endian title id at
//! `align64(header) + align64(cert) + 0x1DC`. Ticket streams are
//! distinguished by their first two little-endian bytes instead.
//!
//! All of these facts must be derived from the initial read block, before
//! the destination transaction is opened - the title id decides which
//! storage medium receives the install and whether the hardware
//! generation is even compatible.

use std::fmt;

use tracing::{debug, warn};

use super::service::{InstallService, InstallSink};
use crate::transfer::TransferError;

/// Offset of the title id relative to the aligned header and cert
/// sections.
const TITLE_ID_TAIL_OFFSET: usize = 0x1DC;

/// First two little-endian bytes of a ticket-format stream.
const TICKET_MAGIC: u16 = 0x0100;

/// Vendor field of this utility's own title id; pre-install cleanup is
/// skipped for it to avoid deleting ourselves mid-reinstall.
const SELF_VENDOR: u64 = 0xF8001;

/// Title ids whose install must be chased with a firmware install.
const FIRMWARE_TITLE_IDS: [u64; 2] = [0x0004_0138_0000_0002, 0x0004_0138_2000_0002];

/// Rounds `value` up to the next 64-byte boundary.
#[must_use]
pub fn align64(value: u32) -> u32 {
    (value + 0x3F) & !0x3F
}

/// 64-bit title identifier with the routing facts packed into its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleId(pub u64);

impl TitleId {
    /// Storage medium this title installs to: titles with platform bits
    /// `0x8010` set in the high word belong on internal storage, the rest
    /// on the removable card.
    #[must_use]
    pub fn media_dest(self) -> MediaDest {
        if (self.0 >> 32) & 0x8010 != 0 {
            MediaDest::Internal
        } else {
            MediaDest::Card
        }
    }

    /// Whether this title requires the newer hardware generation.
    #[must_use]
    pub fn requires_new_model(self) -> bool {
        (self.0 >> 28) & 0xF == 2
    }

    /// The 20-bit vendor field.
    #[must_use]
    pub fn vendor(self) -> u64 {
        (self.0 >> 8) & 0xF_FFFF
    }

    /// True for this utility's own title id family.
    #[must_use]
    pub fn is_self(self) -> bool {
        self.vendor() == SELF_VENDOR
    }

    /// True for title ids that carry a firmware payload.
    #[must_use]
    pub fn is_firmware(self) -> bool {
        FIRMWARE_TITLE_IDS.contains(&self.0)
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Install destination medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDest {
    /// Internal (primary) storage.
    Internal,
    /// Removable card (secondary) storage.
    Card,
}

/// Stream format detected from the initial read block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Ticket-format stream.
    Ticket,
    /// Installable package stream.
    Package,
}

impl StreamKind {
    /// Classifies a stream by its first two bytes.
    pub fn classify(initial_block: &[u8]) -> Result<Self, TransferError> {
        let magic = initial_block
            .get(..2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or_else(|| TransferError::invalid_package("initial block shorter than 2 bytes"))?;
        if magic == TICKET_MAGIC {
            Ok(Self::Ticket)
        } else {
            Ok(Self::Package)
        }
    }
}

/// Facts parsed once from a package stream's preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Raw header-size field from offset 0.
    pub header_size: u32,
    /// Raw certificate-size field from offset 8.
    pub cert_size: u32,
    /// The embedded big-endian title id.
    pub title_id: TitleId,
}

impl PackageHeader {
    /// Parses the preamble from the initial read block.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidPackage`] when the block is too
    /// short to contain the size fields or the computed title id offset.
    pub fn parse(initial_block: &[u8]) -> Result<Self, TransferError> {
        if initial_block.len() < 12 {
            return Err(TransferError::invalid_package(
                "initial block shorter than the size fields",
            ));
        }

        let header_size = u32::from_le_bytes([
            initial_block[0],
            initial_block[1],
            initial_block[2],
            initial_block[3],
        ]);
        let cert_size = u32::from_le_bytes([
            initial_block[8],
            initial_block[9],
            initial_block[10],
            initial_block[11],
        ]);

        let tid_offset =
            align64(header_size) as usize + align64(cert_size) as usize + TITLE_ID_TAIL_OFFSET;
        let tid_bytes = initial_block.get(tid_offset..tid_offset + 8).ok_or_else(|| {
            TransferError::invalid_package(format!(
                "title id offset {tid_offset:#x} beyond initial block of {} bytes",
                initial_block.len()
            ))
        })?;

        let mut raw = [0u8; 8];
        raw.copy_from_slice(tid_bytes);
        let title_id = TitleId(u64::from_be_bytes(raw));

        Ok(Self {
            header_size,
            cert_size,
            title_id,
        })
    }
}

/// Destination handle produced by content routing: either a ticket
/// transaction or a title-install transaction.
pub struct RoutedDestination {
    sink: Box<dyn InstallSink>,
    title_id: Option<TitleId>,
}

impl fmt::Debug for RoutedDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedDestination")
            .field("title_id", &self.title_id)
            .finish_non_exhaustive()
    }
}

impl RoutedDestination {
    /// Routes the initial read block to the matching install transaction.
    ///
    /// Package streams run the hardware-generation check and, unless the
    /// title id matches our own identity, destructive pre-install cleanup
    /// (best effort - a missing prior install is not an error).
    pub async fn open(
        service: &dyn InstallService,
        initial_block: &[u8],
    ) -> Result<Self, TransferError> {
        match StreamKind::classify(initial_block)? {
            StreamKind::Ticket => {
                debug!("routing stream to ticket install");
                let sink = service.begin_ticket().await?;
                Ok(Self {
                    sink,
                    title_id: None,
                })
            }
            StreamKind::Package => {
                let header = PackageHeader::parse(initial_block)?;
                let title_id = header.title_id;
                let dest = title_id.media_dest();
                debug!(
                    %title_id,
                    ?dest,
                    name = crate::titledb::name_or_placeholder(title_id),
                    "routing stream to title install"
                );

                if title_id.requires_new_model() && !service.is_new_model() {
                    return Err(TransferError::IncompatibleHardware {
                        title_id: title_id.0,
                    });
                }

                // Deleting our own title while reinstalling it races the
                // running process, so the cleanup is skipped for it.
                if title_id.is_self() {
                    debug!(%title_id, "skipping pre-install cleanup for own title");
                } else {
                    if let Err(error) = service.delete_title(dest, title_id).await {
                        warn!(%title_id, %error, "pre-install title delete failed");
                    }
                    if let Err(error) = service.delete_ticket(title_id).await {
                        warn!(%title_id, %error, "pre-install ticket delete failed");
                    }
                    if dest == MediaDest::Card {
                        if let Err(error) = service.refresh_title_database().await {
                            warn!(%error, "title database refresh failed");
                        }
                    }
                }

                let sink = service.begin_title(dest, title_id).await?;
                Ok(Self {
                    sink,
                    title_id: Some(title_id),
                })
            }
        }
    }

    /// Commits or aborts the routed transaction. A committed firmware
    /// title is chased with the firmware install step.
    pub async fn close(
        self,
        service: &dyn InstallService,
        succeeded: bool,
    ) -> Result<(), TransferError> {
        if succeeded {
            self.sink.commit().await?;
            if let Some(title_id) = self.title_id.filter(|id| id.is_firmware()) {
                debug!(%title_id, "installing firmware payload");
                service.install_firmware(title_id).await?;
            }
            Ok(())
        } else {
            self.sink.abort().await
        }
    }

    /// Writes a chunk into the underlying transaction.
    pub async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, TransferError> {
        self.sink.write(offset, buf).await
    }

    /// Title id of a package route, `None` for tickets.
    #[must_use]
    pub fn title_id(&self) -> Option<TitleId> {
        self.title_id
    }
}

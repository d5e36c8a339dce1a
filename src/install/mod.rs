//! Install source resolvers and the installer capability surface.
//!
//! Three resolver strategies feed the transfer engine:
//!
//! - [`TicketInstallBackend`] - local ticket files from a directory
//!   listing, optionally deleted after a successful install
//! - [`UrlInstallBackend`] - HTTP GET sources with manual redirect
//!   following, routed by content into ticket or title transactions
//! - [`QrInstallPlan`] - scanned QR payload text decoded into a URL work
//!   list, then delegated to the network backend per URL
//!
//! The privileged installer itself hides behind [`InstallService`]; the
//! directory-backed [`DirInstallService`] stands in for it on a host.

mod net;
mod package;
mod qr;
mod service;
mod ticket;

pub use net::{HttpSource, MAX_REDIRECTS, UrlInstallBackend, build_install_client};
pub use package::{
    MediaDest, PackageHeader, RoutedDestination, StreamKind, TitleId, align64,
};
pub use qr::{QrInstallPlan, SharedFrame, URL_MAX, URLS_MAX, grayscale, parse_payload};
pub use service::{DirInstallService, InstallService, InstallSink};
pub use ticket::{TICKET_SUFFIX, TicketInstallBackend, is_ticket_path};

//! Library to backup the running configuration of [Aruba AOS-CX][aos-cx] switches.
//!
//! The switches are listed in a CSV inventory. Every backup pass fetches the
//! running configuration of each switch through the REST API, stores it as
//! timestamped snapshot and keeps only the newest ones. Complete passes can be
//! mirrored into a git repository or an S3 bucket, see [`mirror`].
//!
//! The pass itself lives in [`orchestrator`].
//!
//! [aos-cx]: https://www.arubanetworks.com/techdocs/AOS-CX/help_portal/Content/home.htm

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod device;
pub mod error;
pub mod events;
pub mod guard;
pub mod inventory;
pub mod mirror;
pub mod orchestrator;
pub mod schedule;
pub mod secret;
pub mod snapshot;
pub mod status;
pub mod util;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MCTP endpoint discovery and PLDM request correlation.
//!
//! Provides the discovery/addressing side of an MCTP binding and the
//! PLDM layer that turns it into request/response transactions.
//!
//! # Features
//!
//! - **Binding**: answers MCTP control requests (Prepare, Endpoint
//!   Discovery, Get/Set Endpoint ID) and publishes EID, BDF and discovery
//!   state through a watch channel
//! - **Terminus registry**: TID allocation and TID/EID mapping
//! - **Correlator**: per-terminus wait slots matched by instance id, with
//!   timeouts
//! - **Firmware inventory**: QueryDeviceIdentifiers and
//!   GetFirmwareParameters with bounded retries
//!
//! # Quick Start
//!
//! ```bash
//! # Endpoint waiting to be discovered on the emulated interconnect
//! pldm-mctpd --bdf 03:00.0 --local 127.0.0.1:9601 --peer 127.0.0.1:9600
//!
//! # Bus owner inventorying two termini
//! pldm-mctpd --config pldm-mctpd.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [binding]
//! mode = "bus-owner"
//! bdf = 0
//! static_eid = 8
//!
//! [transport]
//! local = "127.0.0.1:9600"
//! peer = "127.0.0.1:9601"
//!
//! [pldm]
//! timeout_ms = 100
//! retry_count = 3
//! termini = [9, 10]
//! ```

pub mod config;
pub mod mctp;
pub mod pldm;
pub mod wire;

pub use config::{BindingConfig, BindingMode, ConfigError, DaemonConfig};
pub use mctp::{Binding, BindingError, BindingProperties, DiscoveryState, Eid, InboundMessage};
pub use pldm::fwu::{FirmwareInventory, InventoryError, InventoryRecord};
pub use pldm::{Correlator, RequestError, Requester, Tid};
pub use wire::DecodeError;

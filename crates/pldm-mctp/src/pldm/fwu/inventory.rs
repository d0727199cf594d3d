// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-step firmware inventory of one terminus.

use super::{
    decode_device_identifiers, decode_firmware_parameters, InventoryRecord,
    GET_FIRMWARE_PARAMETERS, QUERY_DEVICE_IDENTIFIERS,
};
use crate::pldm::requester::{RequestError, Requester};
use crate::pldm::{build_request, completion, PldmHeader, PLDM_TYPE_FWU};
use crate::wire::{DecodeError, Reader};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default wait per attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default attempts per step.
pub const DEFAULT_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("command 0x{command:02x} failed with completion code 0x{code:02x}")]
    Completion { command: u8, code: u8 },

    #[error("command 0x{command:02x} got no answer after {attempts} attempts")]
    RetriesExhausted { command: u8, attempts: usize },

    #[error("malformed response to command 0x{command:02x}: {source}")]
    Decode {
        command: u8,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Inventory query engine.
///
/// Runs QueryDeviceIdentifiers then GetFirmwareParameters. Either step
/// failing fails the whole run; no partial record is returned.
#[derive(Debug, Clone)]
pub struct FirmwareInventory {
    timeout: Duration,
    retries: usize,
}

impl Default for FirmwareInventory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_RETRIES)
    }
}

impl FirmwareInventory {
    pub fn new(timeout: Duration, retries: usize) -> Self {
        Self {
            timeout,
            retries: retries.max(1),
        }
    }

    pub async fn run(&self, requester: &mut Requester) -> Result<InventoryRecord, InventoryError> {
        let tid = requester.tid();

        let body = self.exchange(requester, QUERY_DEVICE_IDENTIFIERS).await?;
        let mut device = decode_device_identifiers(&mut Reader::new(&body)).map_err(|source| {
            InventoryError::Decode {
                command: QUERY_DEVICE_IDENTIFIERS,
                source,
            }
        })?;
        debug!("TID {}: {} device identifiers", tid, device.len());

        let body = self.exchange(requester, GET_FIRMWARE_PARAMETERS).await?;
        let (image_set, components) = decode_firmware_parameters(&mut Reader::new(&body))
            .map_err(|source| InventoryError::Decode {
                command: GET_FIRMWARE_PARAMETERS,
                source,
            })?;
        device.extend(image_set);

        info!(
            "TID {}: inventory complete, {} components",
            tid,
            components.len()
        );
        Ok(InventoryRecord { device, components })
    }

    /// Send one command with retries; returns the bytes after a success
    /// completion code.
    async fn exchange(
        &self,
        requester: &mut Requester,
        command: u8,
    ) -> Result<Vec<u8>, InventoryError> {
        let msg = build_request(PLDM_TYPE_FWU, command, &[]);

        for attempt in 1..=self.retries {
            match requester.request(msg.clone(), self.timeout).await {
                Ok(response) => return check_response(command, &response),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "TID {}: command 0x{:02x} attempt {}/{} failed: {}",
                        requester.tid(),
                        command,
                        attempt,
                        self.retries,
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(InventoryError::RetriesExhausted {
            command,
            attempts: self.retries,
        })
    }
}

fn check_response(command: u8, response: &[u8]) -> Result<Vec<u8>, InventoryError> {
    let decode = |source| InventoryError::Decode { command, source };

    let mut r = Reader::new(response);
    let header = PldmHeader::decode(&mut r).map_err(decode)?;
    if header.pldm_type != PLDM_TYPE_FWU || header.command != command {
        return Err(decode(DecodeError::InvalidValue {
            field: "response command",
            value: u32::from(header.command),
        }));
    }
    let code = r.u8("completion code").map_err(decode)?;
    if code != completion::SUCCESS {
        return Err(InventoryError::Completion { command, code });
    }
    Ok(r.rest().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mctp::{Eid, InboundMessage, MessageSender, TransportError, MCTP_MSG_TYPE_PLDM};
    use crate::pldm::fwu::test_support::*;
    use crate::pldm::fwu::PropertyValue;
    use crate::pldm::Correlator;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const DEVICE_EID: Eid = 0x08;

    enum Reply {
        Silent,
        Respond { cc: u8, body: Vec<u8> },
    }

    struct Wire {
        tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl MessageSender for Wire {
        async fn send_message(
            &self,
            _eid: Eid,
            _tag_owner: bool,
            _msg_tag: u8,
            payload: Vec<u8>,
        ) -> Result<(), TransportError> {
            let _ = self.tx.send(payload);
            Ok(())
        }
    }

    /// Correlator wired to a scripted device; returns the commands it saw.
    fn scripted(script: Vec<Reply>) -> (Correlator, tokio::task::JoinHandle<Vec<u8>>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let corr = Correlator::new(Arc::new(Wire { tx }));
        let device = corr.clone();
        let handle = tokio::spawn(async move {
            let mut script: VecDeque<Reply> = script.into();
            let mut seen = Vec::new();
            while let Some(step) = script.pop_front() {
                let Some(req) = rx.recv().await else {
                    break;
                };
                seen.push(req[3]);
                match step {
                    Reply::Respond { cc, body } => {
                        let mut payload = vec![MCTP_MSG_TYPE_PLDM, req[1] & 0x1f, req[2], req[3], cc];
                        payload.extend_from_slice(&body);
                        device.dispatch(InboundMessage {
                            eid: DEVICE_EID,
                            tag_owner: false,
                            msg_tag: 0,
                            payload,
                        });
                    }
                    Reply::Silent => {}
                }
            }
            seen
        });
        (corr, handle)
    }

    fn identifiers() -> Vec<u8> {
        device_identifiers(&[descriptor(0x0000, &0x8086u16.to_le_bytes())])
    }

    fn parameters() -> Vec<u8> {
        firmware_parameters("set-1", &[component(0x0010, "1.0", "")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_inventory() {
        let (corr, device) = scripted(vec![
            Reply::Respond { cc: 0, body: identifiers() },
            Reply::Respond { cc: 0, body: parameters() },
        ]);
        let tid = corr.register_terminus(DEVICE_EID).unwrap();
        let mut req = corr.requester(tid).unwrap();

        let record = FirmwareInventory::default().run(&mut req).await.unwrap();
        assert_eq!(record.device["PCIVendorID"], PropertyValue::U16(0x8086));
        assert_eq!(record.device["ComponentCount"], PropertyValue::U16(1));
        assert_eq!(
            record.components[&0]["ActiveComponentVersionString"],
            PropertyValue::String("1.0".into())
        );

        drop(req);
        drop(corr);
        assert_eq!(device.await.unwrap(), vec![0x01, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_one_retries_then_step_two_fails() {
        let (corr, device) = scripted(vec![
            Reply::Silent,
            Reply::Silent,
            Reply::Respond { cc: 0, body: identifiers() },
            Reply::Respond { cc: completion::ERROR_NOT_READY, body: vec![] },
        ]);
        let tid = corr.register_terminus(DEVICE_EID).unwrap();
        let mut req = corr.requester(tid).unwrap();

        let err = FirmwareInventory::default().run(&mut req).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Completion {
                command: GET_FIRMWARE_PARAMETERS,
                code: completion::ERROR_NOT_READY
            }
        ));

        drop(req);
        drop(corr);
        // The completion code failure is not retried.
        assert_eq!(device.await.unwrap(), vec![0x01, 0x01, 0x01, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let (corr, device) = scripted(vec![Reply::Silent, Reply::Silent, Reply::Silent]);
        let tid = corr.register_terminus(DEVICE_EID).unwrap();
        let mut req = corr.requester(tid).unwrap();

        let err = FirmwareInventory::default().run(&mut req).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::RetriesExhausted {
                command: QUERY_DEVICE_IDENTIFIERS,
                attempts: 3
            }
        ));
        drop(req);
        drop(corr);
        assert_eq!(device.await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_terminal() {
        let mut truncated = parameters();
        truncated.truncate(20);
        let (corr, _device) = scripted(vec![
            Reply::Respond { cc: 0, body: identifiers() },
            Reply::Respond { cc: 0, body: truncated },
        ]);
        let tid = corr.register_terminus(DEVICE_EID).unwrap();
        let mut req = corr.requester(tid).unwrap();

        let err = FirmwareInventory::new(Duration::from_millis(50), 3)
            .run(&mut req)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Decode {
                command: GET_FIRMWARE_PARAMETERS,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unmapped_terminus_is_not_retried() {
        let (corr, _device) = scripted(vec![]);
        let tid = corr.allocate_tid().unwrap();
        let mut req = corr.requester(tid).unwrap();
        let err = FirmwareInventory::default().run(&mut req).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Request(RequestError::InvalidTerminus(_))
        ));
    }

    #[test]
    fn test_check_response_command_mismatch() {
        let resp = [0x01, 0x05, 0x02, 0x00];
        assert!(matches!(
            check_response(QUERY_DEVICE_IDENTIFIERS, &resp),
            Err(InventoryError::Decode { .. })
        ));
        assert_eq!(
            check_response(GET_FIRMWARE_PARAMETERS, &resp).unwrap(),
            Vec::<u8>::new()
        );
    }
}

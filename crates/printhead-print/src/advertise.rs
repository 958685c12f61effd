// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service discovery for the IPP front end.
//
// The printer is announced as `_ipp._tcp.local.` with the TXT keys that
// mobile print dialogs look for.  Advertisement is best effort: failures are
// logged and never stop the server from starting.

use tracing::{info, warn};

/// mDNS service type for IPP printers.
pub const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// Announces (and withdraws) the IPP endpoint on the local network.
pub trait ServiceAdvertiser: Send {
    fn advertise(&mut self, port: u16);
    fn withdraw(&mut self);
}

/// Advertiser that does nothing; used in tests and when discovery is off.
#[derive(Debug, Default)]
pub struct NoopAdvertiser;

impl ServiceAdvertiser for NoopAdvertiser {
    fn advertise(&mut self, _port: u16) {}
    fn withdraw(&mut self) {}
}

/// Static identity published in the TXT record.
#[derive(Debug, Clone)]
pub struct PrinterIdentity {
    pub name: String,
    pub uuid: String,
}

/// TXT record key/value pairs for the given identity.
pub fn txt_records(identity: &PrinterIdentity) -> Vec<(&'static str, String)> {
    vec![
        ("txtvers", "1".into()),
        ("rp", "ipp/print".into()),
        ("ty", identity.name.clone()),
        ("pdl", "application/pdf,application/octet-stream".into()),
        ("UUID", identity.uuid.clone()),
        ("product", "(Printhead Thermal)".into()),
        ("note", "Thermal Receipt Printer".into()),
    ]
}

/// mDNS-SD advertiser backed by `mdns-sd`.
pub struct MdnsAdvertiser {
    identity: PrinterIdentity,
    daemon: Option<mdns_sd::ServiceDaemon>,
    fullname: Option<String>,
}

impl MdnsAdvertiser {
    pub fn new(identity: PrinterIdentity) -> Self {
        Self {
            identity,
            daemon: None,
            fullname: None,
        }
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn advertise(&mut self, port: u16) {
        if self.daemon.is_some() {
            self.withdraw();
        }
        let daemon = match mdns_sd::ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon for advertisement");
                return;
            }
        };

        let records = txt_records(&self.identity);
        let properties: Vec<(&str, &str)> =
            records.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "printhead".into());

        match mdns_sd::ServiceInfo::new(
            IPP_SERVICE_TYPE,
            &self.identity.name,
            &format!("{hostname}.local."),
            "", // empty = auto-detect IP
            port,
            &properties[..],
        ) {
            Ok(service_info) => {
                let service_info = service_info.enable_addr_auto();
                let fullname = service_info.get_fullname().to_owned();
                match daemon.register(service_info) {
                    Ok(_) => {
                        info!(
                            service_type = IPP_SERVICE_TYPE,
                            name = %self.identity.name,
                            port,
                            "mDNS service registered"
                        );
                        self.fullname = Some(fullname);
                    }
                    Err(e) => warn!(error = %e, "failed to register mDNS service"),
                }
            }
            Err(e) => warn!(error = %e, "failed to create mDNS ServiceInfo"),
        }

        self.daemon = Some(daemon);
    }

    fn withdraw(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        if let Some(fullname) = self.fullname.take() {
            match daemon.unregister(&fullname) {
                Ok(_) => info!(name = %fullname, "mDNS service unregistered"),
                Err(e) => warn!(error = %e, "failed to unregister mDNS service"),
            }
        }
        if let Err(e) = daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.withdraw();
    }
}

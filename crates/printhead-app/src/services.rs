// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service wiring: one device arbiter and one settings cell shared by every
// front end the config enables.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use printhead_api::{AdminAccount, ApiServer, ApiServerConfig, ApiState, DeviceInfo, TokenStore};
use printhead_core::{AppConfig, FrontEnd, SharedSettings};
use printhead_device::{DeviceArbiter, FileTransport, RecordingTransport, Transport};
use printhead_print::ipp_server::printer_uuid;
use printhead_print::{
    IppServer, IppServerConfig, MdnsAdvertiser, NoopAdvertiser, PrintPipeline, PrinterIdentity,
    RawServer, RawServerConfig, ServerManager, ServiceAdvertiser, renderer_from_config,
};
use tracing::info;

/// Build the manager with every enabled front end registered but not yet
/// started.  A dry run records device output in memory and skips mDNS.
pub fn build_manager(
    config: &AppConfig,
    config_path: Option<PathBuf>,
    dry_run: bool,
) -> ServerManager {
    let transport: Box<dyn Transport> = if dry_run {
        Box::new(RecordingTransport::new())
    } else {
        Box::new(FileTransport::new(&config.device_path))
    };
    let device = Arc::new(DeviceArbiter::from_boxed(transport));
    let settings: SharedSettings = Arc::new(RwLock::new(config.print_settings()));

    let mut manager = ServerManager::new();

    if config.ipp_enabled {
        let identity = PrinterIdentity {
            name: config.printer_name.clone(),
            uuid: printer_uuid(&config.printer_name),
        };
        let advertiser: Box<dyn ServiceAdvertiser> = if dry_run {
            Box::new(NoopAdvertiser)
        } else {
            Box::new(MdnsAdvertiser::new(identity))
        };
        let pipeline = PrintPipeline {
            device: Arc::clone(&device),
            renderer: renderer_from_config(&config.renderer),
            settings: Arc::clone(&settings),
            trim_margin_rows: config.trim_margin_rows,
        };
        let server = IppServer::new(
            IppServerConfig {
                bind_address: config.bind_address.clone(),
                port: config.ipp_port,
                printer_name: config.printer_name.clone(),
                api_port: config.api_port,
                read_timeout: config.read_timeout(),
            },
            pipeline,
            advertiser,
        );
        manager.insert(FrontEnd::Ipp, Box::new(server));
    }

    if config.raw_enabled {
        let server = RawServer::new(
            RawServerConfig {
                bind_address: config.bind_address.clone(),
                port: config.raw_port,
                read_timeout: config.read_timeout(),
            },
            Arc::clone(&device),
            Arc::clone(&settings),
        );
        manager.insert(FrontEnd::Raw, Box::new(server));
    }

    if config.api_enabled {
        let state = ApiState {
            device: Arc::clone(&device),
            settings: Arc::clone(&settings),
            tokens: Arc::new(TokenStore::new()),
            account: Arc::new(AdminAccount::new(config.clone(), config_path)),
            info: Arc::new(DeviceInfo {
                printer_name: config.printer_name.clone(),
                ipp_port: config.ipp_port,
                raw_port: config.raw_port,
                api_port: config.api_port,
                started: Instant::now(),
            }),
        };
        let server = ApiServer::new(
            ApiServerConfig {
                bind_address: config.bind_address.clone(),
                port: config.api_port,
            },
            state,
        );
        manager.insert(FrontEnd::Api, Box::new(server));
    }

    info!(
        ipp = config.ipp_enabled,
        raw = config.raw_enabled,
        api = config.api_enabled,
        "front ends configured"
    );
    manager
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> AppConfig {
        AppConfig {
            bind_address: "127.0.0.1".into(),
            ipp_port: 0,
            raw_port: 0,
            api_port: 0,
            ..AppConfig::default()
        }
    }

    #[test]
    fn disabled_front_ends_are_not_registered() {
        let config = AppConfig {
            ipp_enabled: false,
            ..local_config()
        };
        let manager = build_manager(&config, None, true);
        assert!(!manager.contains(FrontEnd::Ipp));
        assert!(manager.contains(FrontEnd::Raw));
        assert!(manager.contains(FrontEnd::Api));
    }

    #[tokio::test]
    async fn dry_run_starts_and_stops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let mut manager = build_manager(&local_config(), Some(config_path), true);
        assert_eq!(manager.start_all().await, 3);
        assert!(manager.any_running());
        manager.stop_all().await;
        assert!(!manager.any_running());
    }
}

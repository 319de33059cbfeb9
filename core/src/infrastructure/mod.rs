// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod keyring;
pub mod manifest_store;
pub mod openid;
pub mod stream_bus;

pub use keyring::{AuthError, Keyring};
pub use manifest_store::{BusManifestStore, ManifestStore, ManifestStoreError};
pub use openid::CallerGate;
pub use stream_bus::{BusError, MemoryBus, RedisBus, StreamBus, StreamEntry};

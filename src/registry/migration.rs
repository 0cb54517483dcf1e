// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant migration: moves a device between owners without losing its id,
//! claim state, or MQTT credentials (username is the MAC, which is
//! tenant-independent).

use serde_json::json;
use uuid::Uuid;

use super::Registry;
use crate::error::{FabricError, FabricResult};

impl Registry {
    pub async fn migrate_tenant(&self, device_id: Uuid, new_tenant_id: Uuid) -> FabricResult<()> {
        let device = self
            .db
            .find_device_by_id(device_id)
            .await?
            .ok_or_else(|| FabricError::NotFound("device not found".into()))?;
        if device.unclaimed_at.is_some() {
            return Err(FabricError::Gone("device is unclaimed".into()));
        }

        let old_tenant = device.tenant_id.to_string();

        let mut tx = self.db.begin().await?;
        self.db.update_device_tenant(&mut tx, device_id, new_tenant_id).await?;
        tx.commit().await.map_err(|e| FabricError::Transient(e.to_string()))?;

        // Published on the device's *old* tenant-prefixed topic: the device
        // hasn't switched prefixes yet and won't hear the command otherwise.
        self.fabric
            .publish_command(
                &old_tenant,
                &device.mac,
                "update_tenant",
                json!({"tenant_id": new_tenant_id}),
            )
            .await?;
        Ok(())
    }
}

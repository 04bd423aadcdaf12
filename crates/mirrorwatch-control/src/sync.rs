//! The endpoint registry and its synchronization with the SDN controller.
//!
//! [`SyncEngine`] owns every tracked [`Endpoint`]. It reconciles controller
//! polls into the registry, applies classification decisions and operator
//! actions, drives investigations within the mirroring bound, and persists
//! the registry through an optional [`Store`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use mirrorwatch_core::{normalize_mac, EndpointHash};
use mirrorwatch_store::{
    Endpoint, EndpointData, EndpointState, SnapshotHistory, Store, StoreError, Timestamp,
};
use serde_json::{Map, Value};

use crate::classification::{identity_record, parse_classification, record_timestamp};
use crate::controller::{AclRules, SdnController};
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::query::Filter;
use crate::types::{ControlConfig, Machine, ReconcileReport, ReinvestigationReport};

/// Returns true if an address carries no information.
///
/// Controllers report a missing address as absent, blank, `"None"` or `"0"`.
#[must_use]
pub fn is_empty_address(value: Option<&str>) -> bool {
    value.map_or(true, |v| matches!(v.trim(), "" | "None" | "0"))
}

/// Merge the addresses of `incoming` into `current`.
///
/// IPv4 and IPv6 are handled independently; an empty incoming address keeps
/// the current one.
pub fn merge_addresses(current: &mut EndpointData, incoming: &EndpointData) {
    if !is_empty_address(incoming.ipv4.as_deref()) {
        current.ipv4.clone_from(&incoming.ipv4);
    }
    if !is_empty_address(incoming.ipv6.as_deref()) {
        current.ipv6.clone_from(&incoming.ipv6);
    }
}

fn refresh_data(current: &mut EndpointData, incoming: &EndpointData) {
    merge_addresses(current, incoming);
    if !incoming.port.is_empty() {
        current.port.clone_from(&incoming.port);
    }
    if !incoming.segment.is_empty() {
        current.segment.clone_from(&incoming.segment);
    }
    if incoming.external_id.is_some() {
        current.external_id.clone_from(&incoming.external_id);
    }
    current.behavior = incoming.behavior;
}

fn data_from_machine(machine: &Machine) -> EndpointData {
    let address = |value: &Option<String>| {
        value
            .clone()
            .filter(|v| !is_empty_address(Some(v.as_str())))
    };
    EndpointData {
        tenant: machine.tenant.clone().unwrap_or_default(),
        mac: normalize_mac(&machine.mac),
        segment: machine.segment.clone(),
        port: machine.port.clone().unwrap_or_default(),
        ipv4: address(&machine.ipv4),
        ipv6: address(&machine.ipv6),
        role: None,
        external_id: machine.id.clone(),
        behavior: machine.behavior,
    }
}

/// Add classification snapshots to an endpoint's metadata.
///
/// Entries are keyed by address, then timestamp. An existing timestamp is
/// never overwritten. Returns the number of snapshots added.
pub fn record_history(
    endpoint: &mut Endpoint,
    mac_updates: BTreeMap<String, SnapshotHistory>,
    ipv4_updates: BTreeMap<String, SnapshotHistory>,
    ipv6_updates: BTreeMap<String, SnapshotHistory>,
) -> usize {
    let metadata = &mut endpoint.metadata;
    merge_history(&mut metadata.mac_addresses, mac_updates)
        + merge_history(&mut metadata.ipv4_addresses, ipv4_updates)
        + merge_history(&mut metadata.ipv6_addresses, ipv6_updates)
}

fn merge_history(
    target: &mut BTreeMap<String, SnapshotHistory>,
    updates: BTreeMap<String, SnapshotHistory>,
) -> usize {
    let mut added = 0;
    for (address, snapshots) in updates {
        let history = target.entry(address).or_default();
        for (at, snapshot) in snapshots {
            if let Entry::Vacant(slot) = history.entry(at) {
                slot.insert(snapshot);
                added += 1;
            }
        }
    }
    added
}

fn as_seconds(duration: Duration) -> Timestamp {
    Timestamp::try_from(duration.as_secs()).unwrap_or(Timestamp::MAX)
}

fn tolerate(result: Result<bool>, endpoint: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "Mirror actuation failed");
            Ok(())
        }
    }
}

/// The endpoint registry.
pub struct SyncEngine<S: Store> {
    config: ControlConfig,
    controller: Arc<dyn SdnController>,
    store: Option<Arc<S>>,
    endpoints: BTreeMap<EndpointHash, Endpoint>,
    names: BTreeMap<String, EndpointHash>,
    events: VecDeque<Value>,
}

impl<S: Store> SyncEngine<S> {
    /// Create an empty registry.
    ///
    /// Without a store the registry lives in memory only.
    #[must_use]
    pub fn new(
        config: ControlConfig,
        controller: Arc<dyn SdnController>,
        store: Option<Arc<S>>,
    ) -> Self {
        if store.is_none() {
            tracing::warn!("No endpoint store available, registry will not survive restarts");
        }
        Self {
            config,
            controller,
            store,
            endpoints: BTreeMap::new(),
            names: BTreeMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Get the controller adapter.
    #[must_use]
    pub const fn controller(&self) -> &Arc<dyn SdnController> {
        &self.controller
    }

    /// Number of tracked endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if no endpoint is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// All tracked endpoints, ordered by hash.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Retained controller events, oldest first.
    pub fn controller_events(&self) -> impl Iterator<Item = &Value> {
        self.events.iter()
    }

    fn insert(&mut self, endpoint: Endpoint) {
        self.names.insert(endpoint.name.clone(), endpoint.hash);
        self.endpoints.insert(endpoint.hash, endpoint);
    }

    fn state_of(&self, hash: &EndpointHash) -> Option<EndpointState> {
        self.endpoints.get(hash).map(|e| e.state)
    }

    fn count_in(&self, state: EndpointState) -> usize {
        self.endpoints.values().filter(|e| e.state == state).count()
    }

    fn free_slots(&self) -> usize {
        self.config
            .max_concurrent_reinvestigations
            .saturating_sub(self.count_in(EndpointState::Mirroring))
    }

    /// Endpoints in `state` that pass `filter`, least recently changed first.
    fn oldest_in(
        &self,
        state: EndpointState,
        filter: impl Fn(&Endpoint) -> bool,
    ) -> Vec<EndpointHash> {
        let mut candidates: Vec<_> = self
            .endpoints
            .values()
            .filter(|e| e.state == state && filter(e))
            .map(|e| (e.last_transition_at(), e.hash))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, hash)| hash).collect()
    }

    /// Apply a transition and the mirror actuation it implies.
    ///
    /// Entering `Mirroring` adds the mirror; leaving it clears the mirror.
    /// Non-fatal actuation errors are logged and the transition stands.
    async fn transition(
        &mut self,
        hash: &EndpointHash,
        to: EndpointState,
        now: Timestamp,
    ) -> Result<EndpointState> {
        let endpoint = self
            .endpoints
            .get_mut(hash)
            .ok_or_else(|| ControlError::EndpointNotFound(hash.to_hex()))?;
        let from = lifecycle::apply_transition(endpoint, to, now)?;

        let actuation = if lifecycle::is_investigating(to) {
            self.controller.mirror_endpoint(endpoint).await
        } else if lifecycle::is_investigating(from) {
            self.controller.unmirror_endpoint(endpoint).await
        } else {
            Ok(true)
        };
        tolerate(actuation, &endpoint.name)?;
        Ok(from)
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// Reconcile one controller poll into the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a transition triggers a fatal actuation failure.
    pub async fn reconcile(
        &mut self,
        machines: &[Machine],
        now: Timestamp,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut order = Vec::new();
        let mut groups: BTreeMap<EndpointHash, (EndpointData, bool)> = BTreeMap::new();

        for machine in machines {
            if machine.source != self.config.expected_source {
                report.foreign += 1;
                continue;
            }
            if machine.mac.trim().is_empty() {
                tracing::debug!(id = ?machine.id, "Skipping machine without hardware address");
                report.skipped += 1;
                continue;
            }
            let data = data_from_machine(machine);
            let hash = EndpointHash::compute(&data.tenant, &data.mac);
            match groups.entry(hash) {
                Entry::Occupied(mut slot) => {
                    let (current, active) = slot.get_mut();
                    refresh_data(current, &data);
                    *active |= machine.active;
                }
                Entry::Vacant(slot) => {
                    order.push(hash);
                    slot.insert((data, machine.active));
                }
            }
        }

        let seen: BTreeSet<EndpointHash> = order.iter().copied().collect();

        for hash in order {
            let Some((data, active)) = groups.remove(&hash) else {
                continue;
            };

            if !self.endpoints.contains_key(&hash) {
                if active {
                    let endpoint = Endpoint::new(data, now);
                    tracing::info!(
                        endpoint = %endpoint.name,
                        mac = %endpoint.data.mac,
                        segment = %endpoint.data.segment,
                        "Discovered endpoint"
                    );
                    self.insert(endpoint);
                    report.created += 1;
                } else {
                    report.skipped += 1;
                }
                continue;
            }

            let Some(endpoint) = self.endpoints.get_mut(&hash) else {
                continue;
            };
            refresh_data(&mut endpoint.data, &data);
            let (state, prior) = (endpoint.state, endpoint.prior_state);

            if state == EndpointState::Inactive && active {
                self.transition(&hash, lifecycle::restore_target(prior), now)
                    .await?;
                report.restored += 1;
            } else if !active && lifecycle::is_observed(state) {
                self.transition(&hash, EndpointState::Inactive, now).await?;
                report.deactivated += 1;
            }
        }

        let absent: Vec<EndpointHash> = self
            .endpoints
            .values()
            .filter(|e| lifecycle::is_observed(e.state) && !seen.contains(&e.hash))
            .map(|e| e.hash)
            .collect();
        for hash in &absent {
            self.transition(hash, EndpointState::Inactive, now).await?;
            report.deactivated += 1;
        }

        tracing::info!(
            foreign = report.foreign,
            skipped = report.skipped,
            created = report.created,
            restored = report.restored,
            deactivated = report.deactivated,
            "Reconciled topology"
        );
        Ok(report)
    }

    /// Ask the controller for its current machines.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ControllerTimeout` if the controller does not
    /// answer within the configured timeout, or the controller's own error.
    pub async fn poll_machines(&self) -> Result<Vec<Machine>> {
        let limit = self.config.controller_timeout;
        tokio::time::timeout(limit, self.controller.get_machines())
            .await
            .map_err(|_| ControlError::ControllerTimeout(limit))?
    }

    /// Poll the controller, reconcile, and start investigating new endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll fails or actuation fails fatally.
    pub async fn refresh_topology(&mut self, now: Timestamp) -> Result<ReconcileReport> {
        let machines = self.poll_machines().await?;
        let report = self.reconcile(&machines, now).await?;
        self.investigate(now).await?;
        Ok(report)
    }

    // =========================================================================
    // Investigation
    // =========================================================================

    /// Move `Unknown` endpoints into `Mirroring` while slots are free, and
    /// into `Queued` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails fatally.
    pub async fn investigate(&mut self, now: Timestamp) -> Result<ReinvestigationReport> {
        let mut report = ReinvestigationReport::default();
        let mut free = self.free_slots();

        for hash in self.oldest_in(EndpointState::Unknown, |_| true) {
            if free > 0 {
                self.transition(&hash, EndpointState::Mirroring, now).await?;
                free -= 1;
                report.started += 1;
            } else {
                self.transition(&hash, EndpointState::Queued, now).await?;
                report.queued += 1;
            }
        }
        Ok(report)
    }

    /// Expire stale mirrors and hand free slots to waiting endpoints.
    ///
    /// Mirrors older than the mirror timeout return to the queue. Free slots
    /// go to queued endpoints first, then to known endpoints settled for
    /// longer than the reinvestigation frequency. Endpoints expired in this
    /// pass are not re-mirrored until the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails fatally.
    pub async fn reinvestigate(&mut self, now: Timestamp) -> Result<ReinvestigationReport> {
        let mut report = ReinvestigationReport::default();

        let timeout = as_seconds(self.config.mirror_timeout);
        let expired = self.oldest_in(EndpointState::Mirroring, |e| {
            now - e.last_transition_at() >= timeout
        });
        for hash in &expired {
            self.transition(hash, EndpointState::Queued, now).await?;
            report.timed_out += 1;
        }

        let frequency = as_seconds(self.config.reinvestigation_frequency);
        let mut candidates =
            self.oldest_in(EndpointState::Queued, |e| !expired.contains(&e.hash));
        candidates.extend(self.oldest_in(EndpointState::Known, |e| {
            now - e.last_transition_at() >= frequency
        }));

        let free = self.free_slots();
        for hash in candidates.into_iter().take(free) {
            self.transition(&hash, EndpointState::Mirroring, now).await?;
            report.started += 1;
        }

        let fresh = self.investigate(now).await?;
        report.started += fresh.started;
        report.queued += fresh.queued;

        if report != ReinvestigationReport::default() {
            tracing::info!(
                timed_out = report.timed_out,
                started = report.started,
                queued = report.queued,
                "Reinvestigation pass"
            );
        }
        Ok(report)
    }

    /// Record decision-engine output.
    ///
    /// `decisions` maps an endpoint name or hash to its ML record. Each record
    /// becomes a snapshot under the endpoint's addresses, and a mirroring
    /// endpoint becomes `Known`. Returns the number of records applied.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails fatally.
    pub async fn apply_decisions(
        &mut self,
        decisions: &Map<String, Value>,
        now: Timestamp,
    ) -> Result<usize> {
        let mut applied = 0;

        for (key, record) in decisions {
            let Some(hash) = self.resolve(key) else {
                tracing::debug!(identity = %key, "Decision for untracked endpoint");
                continue;
            };
            let Some(endpoint) = self.endpoints.get_mut(&hash) else {
                continue;
            };

            let snapshot = parse_classification(&identity_record(endpoint), record);
            let at = record_timestamp(record, now);
            let entry = |address: &String| {
                (address.clone(), SnapshotHistory::from([(at, snapshot.clone())]))
            };
            let mac_updates = BTreeMap::from([entry(&endpoint.data.mac)]);
            let ipv4_updates = endpoint.data.ipv4.iter().map(entry).collect();
            let ipv6_updates = endpoint.data.ipv6.iter().map(entry).collect();
            record_history(endpoint, mac_updates, ipv4_updates, ipv6_updates);

            tracing::info!(
                endpoint = %endpoint.name,
                behavior = %snapshot.behavior,
                labels = ?snapshot.labels,
                "Recorded classification"
            );

            if lifecycle::is_investigating(endpoint.state) {
                self.transition(&hash, EndpointState::Known, now).await?;
            }
            applied += 1;
        }
        Ok(applied)
    }

    // =========================================================================
    // Operator actions
    // =========================================================================

    fn resolve_targets(&self, targets: &[String]) -> Vec<EndpointHash> {
        targets
            .iter()
            .filter_map(|target| {
                let hash = self.resolve(target);
                if hash.is_none() {
                    tracing::warn!(endpoint = %target, "No endpoint matches target");
                }
                hash
            })
            .collect()
    }

    /// Exclude endpoints from investigation.
    ///
    /// # Errors
    ///
    /// Returns an error if clearing a mirror fails fatally.
    pub async fn ignore(&mut self, targets: &[String], now: Timestamp) -> Result<usize> {
        let mut changed = 0;
        for hash in self.resolve_targets(targets) {
            if self.state_of(&hash) == Some(EndpointState::Ignored) {
                continue;
            }
            self.transition(&hash, EndpointState::Ignored, now).await?;
            tracing::info!(endpoint = %hash, "Ignoring endpoint");
            changed += 1;
        }
        Ok(changed)
    }

    /// Return ignored endpoints to `Unknown`.
    ///
    /// # Errors
    ///
    /// Returns an error if a transition fails.
    pub async fn clear_ignored(&mut self, targets: &[String], now: Timestamp) -> Result<usize> {
        let mut changed = 0;
        for hash in self.resolve_targets(targets) {
            if self.state_of(&hash) != Some(EndpointState::Ignored) {
                continue;
            }
            self.transition(&hash, EndpointState::Unknown, now).await?;
            tracing::info!(endpoint = %hash, "Cleared ignored endpoint");
            changed += 1;
        }
        Ok(changed)
    }

    async fn remove_endpoint(&mut self, hash: &EndpointHash) -> Result<bool> {
        let Some(endpoint) = self.endpoints.get(hash) else {
            return Ok(false);
        };
        if lifecycle::is_investigating(endpoint.state) {
            let result = self.controller.unmirror_endpoint(endpoint).await;
            tolerate(result, &endpoint.name)?;
        }

        let Some(endpoint) = self.endpoints.remove(hash) else {
            return Ok(false);
        };
        self.names.remove(&endpoint.name);
        self.delete_stored(hash);
        tracing::info!(endpoint = %endpoint.name, state = %endpoint.state, "Removed endpoint");
        Ok(true)
    }

    async fn remove_all(&mut self, hashes: Vec<EndpointHash>) -> Result<usize> {
        let mut removed = 0;
        for hash in hashes {
            if self.remove_endpoint(&hash).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove endpoints by name or hash.
    ///
    /// # Errors
    ///
    /// Returns an error if clearing a mirror fails fatally.
    pub async fn remove(&mut self, targets: &[String]) -> Result<usize> {
        let hashes = self.resolve_targets(targets);
        self.remove_all(hashes).await
    }

    /// Remove every ignored endpoint.
    ///
    /// # Errors
    ///
    /// Never fails in practice; ignored endpoints hold no mirror.
    pub async fn remove_ignored(&mut self) -> Result<usize> {
        let hashes = self.oldest_in(EndpointState::Ignored, |_| true);
        self.remove_all(hashes).await
    }

    /// Remove every inactive endpoint.
    ///
    /// # Errors
    ///
    /// Never fails in practice; inactive endpoints hold no mirror.
    pub async fn remove_inactives(&mut self) -> Result<usize> {
        let hashes = self.oldest_in(EndpointState::Inactive, |_| true);
        self.remove_all(hashes).await
    }

    /// Assign roles from `(target, role)` pairs.
    pub fn change_roles(&mut self, changes: &[(String, String)]) -> usize {
        let mut changed = 0;
        for (target, role) in changes {
            let Some(hash) = self.resolve(target) else {
                tracing::warn!(endpoint = %target, "No endpoint matches role change");
                continue;
            };
            if let Some(endpoint) = self.endpoints.get_mut(&hash) {
                tracing::info!(endpoint = %endpoint.name, role = %role, "Changing endpoint role");
                endpoint.data.role = Some(role.clone());
                changed += 1;
            }
        }
        changed
    }

    /// Forward ACL rules to the controller.
    ///
    /// # Errors
    ///
    /// Returns the controller's error.
    pub async fn update_acls(&self, rules: &AclRules) -> Result<()> {
        self.controller.update_acls(rules).await
    }

    /// Keep a raw controller event and pass it to the controller adapter.
    pub fn record_controller_event(&mut self, event: Value) {
        self.controller.ingest_event(&event);
        self.events.push_back(event);
        while self.events.len() > self.config.event_buffer {
            self.events.pop_front();
        }
    }

    /// Give an endpoint a new lookup name.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::EndpointNotFound` if `target` matches nothing,
    /// `ControlError::ReservedName` if `new_name` is some other endpoint
    /// hash, or `ControlError::NameInUse` if another endpoint resolves by
    /// `new_name`.
    pub fn rename(&mut self, target: &str, new_name: &str) -> Result<()> {
        let hash = self
            .resolve(target)
            .ok_or_else(|| ControlError::EndpointNotFound(target.to_string()))?;
        // Hash-shaped names would shadow endpoints that have not arrived yet.
        if EndpointHash::from_hex(new_name).is_ok_and(|named| named != hash) {
            return Err(ControlError::ReservedName(new_name.to_string()));
        }
        if self.resolve(new_name).is_some_and(|other| other != hash) {
            return Err(ControlError::NameInUse(new_name.to_string()));
        }

        let endpoint = self
            .endpoints
            .get_mut(&hash)
            .ok_or_else(|| ControlError::EndpointNotFound(target.to_string()))?;
        self.names.remove(&endpoint.name);
        endpoint.name = new_name.to_string();
        self.names.insert(endpoint.name.clone(), hash);
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every endpoint to the store in one batch.
    ///
    /// Returns false if there is no store or the write failed.
    pub fn persist(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let endpoints: Vec<Endpoint> = self.endpoints.values().cloned().collect();
        match store.put_endpoints(&endpoints) {
            Ok(()) => {
                tracing::debug!(count = endpoints.len(), "Persisted endpoints");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist endpoints, continuing in memory");
                false
            }
        }
    }

    /// Replace the registry with the stored endpoints.
    ///
    /// Returns the number of endpoints restored, or zero if there is no
    /// store or the scan failed.
    pub fn restore(&mut self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.list_all_endpoints() {
            Ok(endpoints) => {
                self.endpoints.clear();
                self.names.clear();
                let count = endpoints.len();
                for endpoint in endpoints {
                    self.insert(endpoint);
                }
                tracing::info!(count, "Restored endpoints");
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore endpoints, starting empty");
                0
            }
        }
    }

    fn delete_stored(&self, hash: &EndpointHash) {
        let Some(store) = &self.store else {
            return;
        };
        match store.delete_endpoint(hash) {
            Ok(()) | Err(StoreError::EndpointNotFound(_)) => {}
            Err(e) => tracing::warn!(endpoint = %hash, error = %e, "Failed to delete stored endpoint"),
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Resolve a name, falling back to a hash in hex.
    #[must_use]
    pub fn resolve(&self, target: &str) -> Option<EndpointHash> {
        self.names.get(target).copied().or_else(|| {
            let hash = target.parse::<EndpointHash>().ok()?;
            self.endpoints.contains_key(&hash).then_some(hash)
        })
    }

    /// Get an endpoint by hash.
    #[must_use]
    pub fn endpoint(&self, hash: &EndpointHash) -> Option<&Endpoint> {
        self.endpoints.get(hash)
    }

    /// Get an endpoint by hash in hex.
    #[must_use]
    pub fn endpoint_by_hash(&self, hex: &str) -> Option<&Endpoint> {
        hex.parse::<EndpointHash>()
            .ok()
            .and_then(|hash| self.endpoints.get(&hash))
    }

    /// Get an endpoint by name.
    #[must_use]
    pub fn endpoint_by_name(&self, name: &str) -> Option<&Endpoint> {
        self.names.get(name).and_then(|hash| self.endpoints.get(hash))
    }

    /// Endpoints whose IPv4 or IPv6 address is `ip`.
    #[must_use]
    pub fn endpoints_by_ip(&self, ip: &str) -> Vec<&Endpoint> {
        self.endpoints
            .values()
            .filter(|e| e.data.ipv4.as_deref() == Some(ip) || e.data.ipv6.as_deref() == Some(ip))
            .collect()
    }

    /// Endpoints with hardware address `mac`, in any tenant.
    #[must_use]
    pub fn endpoints_by_mac(&self, mac: &str) -> Vec<&Endpoint> {
        let mac = normalize_mac(mac);
        self.endpoints
            .values()
            .filter(|e| e.data.mac == mac)
            .collect()
    }

    /// Endpoints matching a query expression.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidQuery` if the expression does not parse.
    pub fn query(&self, expr: &str) -> Result<Vec<&Endpoint>> {
        let filter: Filter = expr.parse()?;
        Ok(self
            .endpoints
            .values()
            .filter(|e| filter.matches(e))
            .collect())
    }

    /// Number of endpoints in each state, including empty states.
    #[must_use]
    pub fn state_counts(&self) -> BTreeMap<EndpointState, usize> {
        let mut counts: BTreeMap<EndpointState, usize> =
            EndpointState::ALL.iter().map(|s| (*s, 0)).collect();
        for endpoint in self.endpoints.values() {
            *counts.entry(endpoint.state).or_default() += 1;
        }
        counts
    }
}

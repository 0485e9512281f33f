//! Installed Connector
//!
//! One configured provider instance. Every call goes through the same
//! gate before the plugin sees it:
//!
//! 1. lifecycle: `NotYetInstalled` until `install` succeeded
//! 2. capability: `NotImplemented` unless the provider declared it
//! 3. dispatch
//!
//! Fetches run through one [`FetchEngine`] per entity kind; items are
//! written to storage before the cursor is committed, so a failed write
//! leaves the scope where it was.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConnectorEntry};
use crate::error::{PluginError, PluginResult};
use crate::models::{
    ConnectorTaskTree, PspAccount, PspBalance, PspConversion, PspOrder, PspOther, PspPayment,
    PspWebhook, TaskType, WebhookConfig, WebhookEvent,
};
use crate::pagination::{FetchEngine, FetchKind};
use crate::plugin::*;
use crate::storage::Storage;
use crate::webhook;

pub struct Connector {
    name: String,
    plugin: Arc<dyn Plugin>,
    capabilities: CapabilitySet,
    lifecycle: Lifecycle,
    storage: Arc<dyn Storage>,
    engines: DashMap<String, Arc<FetchEngine>>,
    page_size: usize,
    /// `<webhooks.base_url>/<connector name>`
    webhook_base_url: String,
}

/// Items produced per task by [`Connector::run_workflow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tasks_run: usize,
    pub items: BTreeMap<String, usize>,
}

impl Connector {
    pub fn new(
        name: &str,
        plugin: Arc<dyn Plugin>,
        capabilities: CapabilitySet,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            name: name.to_string(),
            plugin,
            capabilities,
            lifecycle: Lifecycle::new(),
            storage,
            engines: DashMap::new(),
            page_size: 25,
            webhook_base_url: String::new(),
        }
    }

    /// Build the connector described by one `connectors:` entry.
    ///
    /// `pageSize`, `offsetAdvance` and `trimChunkSize` in the entry's own
    /// config win over `engine.page_size`, `engine.offset_advance` and
    /// `webhooks.trim_chunk_size`.
    pub fn from_config(
        registry: &Registry,
        entry: &ConnectorEntry,
        config: &AppConfig,
        storage: Arc<dyn Storage>,
    ) -> PluginResult<Self> {
        let mut raw = match &entry.config {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let page_size = raw
            .get("pageSize")
            .and_then(Value::as_u64)
            .map_or(config.engine.page_size, |n| n as usize);
        // Entry settings win over the application-wide defaults.
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("name")
                .or_insert_with(|| Value::String(entry.name.clone()));
            obj.entry("offsetAdvance")
                .or_insert(serde_json::to_value(config.engine.offset_advance)?);
            obj.entry("trimChunkSize")
                .or_insert_with(|| Value::from(config.webhooks.trim_chunk_size));
        }

        let (plugin, _) = registry.create(&entry.provider, &entry.name, &raw)?;
        let capabilities = registry.capabilities(&entry.provider)?.clone();
        Ok(Self::new(&entry.name, plugin, capabilities, storage)
            .with_page_size(page_size)
            .with_webhook_base_url(&webhook::full_url(&config.webhooks.base_url, &entry.name)))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_webhook_base_url(mut self, base_url: &str) -> Self {
        self.webhook_base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn webhook_base_url(&self) -> &str {
        &self.webhook_base_url
    }

    fn ready(&self, capability: Capability) -> PluginResult<()> {
        self.lifecycle.ensure_installed()?;
        self.capabilities.require(capability)
    }

    fn engine(&self, kind: &FetchKind) -> Arc<FetchEngine> {
        let key = kind.to_string();
        self.engines
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(FetchEngine::new(
                    &self.name,
                    &key,
                    self.page_size,
                    self.storage.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// Cursor engine of one kind, for status reporting.
    pub fn fetch_engine(&self, kind: &FetchKind) -> Arc<FetchEngine> {
        self.engine(kind)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Install the connector and register its webhooks.
    ///
    /// Returns the workflow the scheduler should run.
    pub async fn install(&self) -> PluginResult<Vec<ConnectorTaskTree>> {
        if self.lifecycle.is_installed() {
            return Err(PluginError::InvalidRequest(format!(
                "connector {} already installed",
                self.name
            )));
        }
        let resp = self
            .plugin
            .install(InstallRequest {
                connector_id: self.name.clone(),
                webhook_base_url: self.webhook_base_url.clone(),
            })
            .await?;
        self.lifecycle.mark_installed(&resp);

        if self.capabilities.contains(Capability::CreateWebhooks) {
            let created = self.create_webhooks(None).await;
            if let Err(err) = created {
                warn!(connector = %self.name, error = %err, "Webhook registration failed, rolling back install");
                self.rollback_install().await;
                return Err(err);
            }
        }

        info!(
            connector = %self.name,
            plugin = self.plugin.name(),
            tasks = resp.workflow.iter().map(|t| t.walk().len()).sum::<usize>(),
            "Connector installed"
        );
        Ok(resp.workflow)
    }

    /// Undo a partial install on the provider side, then locally. A failed
    /// plugin uninstall is logged; the original error is what the caller sees.
    async fn rollback_install(&self) {
        let webhook_configs = self.lifecycle.installed_webhooks().unwrap_or_default();
        if let Err(err) = self
            .plugin
            .uninstall(UninstallRequest {
                connector_id: self.name.clone(),
                webhook_configs,
            })
            .await
        {
            warn!(connector = %self.name, error = %err, code = err.code(), "Plugin uninstall during rollback failed");
        }
        self.lifecycle.mark_uninstalled();
    }

    /// Call `create_webhooks` and record the returned configs.
    pub async fn create_webhooks(&self, from_payload: Option<Value>) -> PluginResult<Vec<WebhookConfig>> {
        self.ready(Capability::CreateWebhooks)?;
        let resp = self
            .plugin
            .create_webhooks(CreateWebhooksRequest {
                connector_id: self.name.clone(),
                webhook_base_url: self.webhook_base_url.clone(),
                from_payload,
            })
            .await?;
        self.lifecycle.add_webhooks(&resp.configs)?;
        if !resp.others.is_empty() {
            self.storage
                .store_others(&self.name, "webhooks", &resp.others)
                .await?;
        }
        debug!(connector = %self.name, configs = resp.configs.len(), "Webhooks registered");
        Ok(resp.configs)
    }

    /// Uninstall and forget every fetch cursor.
    pub async fn uninstall(&self) -> PluginResult<()> {
        let webhook_configs = self.lifecycle.installed_webhooks()?;
        let kinds = self.known_kinds();
        self.plugin
            .uninstall(UninstallRequest {
                connector_id: self.name.clone(),
                webhook_configs,
            })
            .await?;
        self.lifecycle.mark_uninstalled();
        self.reset_kinds(kinds).await?;
        info!(connector = %self.name, "Connector uninstalled");
        Ok(())
    }

    /// Forget every fetch cursor, in memory and in storage, so the next
    /// fetch of each scope starts from the beginning.
    pub async fn reset(&self) -> PluginResult<()> {
        self.reset_kinds(self.known_kinds()).await
    }

    fn known_kinds(&self) -> BTreeSet<String> {
        let mut kinds: BTreeSet<String> = [
            FetchKind::Accounts,
            FetchKind::ExternalAccounts,
            FetchKind::Balances,
            FetchKind::Payments,
            FetchKind::Orders,
            FetchKind::Conversions,
        ]
        .iter()
        .map(|k| k.to_string())
        .collect();
        kinds.extend(self.engines.iter().map(|e| e.key().clone()));
        if let LifecycleState::Installed { workflow, .. } = self.lifecycle.state() {
            for root in &workflow {
                for task in root.walk() {
                    if let TaskType::FetchOthers { name } = &task.task {
                        kinds.insert(FetchKind::Others(name.clone()).to_string());
                    }
                }
            }
        }
        kinds
    }

    async fn reset_kinds(&self, kinds: BTreeSet<String>) -> PluginResult<()> {
        for kind in kinds {
            match self.engines.get(&kind).map(|e| e.value().clone()) {
                Some(engine) => engine.reset().await?,
                None => self.storage.clear_states(&self.name, &kind).await?,
            }
        }
        Ok(())
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    pub async fn fetch_next_accounts(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        self.ready(Capability::FetchAccounts)?;
        self.engine(&FetchKind::Accounts)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_accounts(req).await?;
                self.storage.store_accounts(&self.name, &resp.items).await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_external_accounts(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        self.ready(Capability::FetchExternalAccounts)?;
        self.engine(&FetchKind::ExternalAccounts)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_external_accounts(req).await?;
                self.storage
                    .store_external_accounts(&self.name, &resp.items)
                    .await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_balances(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspBalance>> {
        self.ready(Capability::FetchBalances)?;
        self.engine(&FetchKind::Balances)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_balances(req).await?;
                self.storage.store_balances(&self.name, &resp.items).await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_payments(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspPayment>> {
        self.ready(Capability::FetchPayments)?;
        self.engine(&FetchKind::Payments)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_payments(req).await?;
                self.storage.store_payments(&self.name, &resp.items).await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_orders(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspOrder>> {
        self.ready(Capability::FetchOrders)?;
        self.engine(&FetchKind::Orders)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_orders(req).await?;
                self.storage.store_orders(&self.name, &resp.items).await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_conversions(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspConversion>> {
        self.ready(Capability::FetchConversions)?;
        self.engine(&FetchKind::Conversions)
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_conversions(req).await?;
                self.storage
                    .store_conversions(&self.name, &resp.items)
                    .await?;
                Ok(resp)
            })
            .await
    }

    pub async fn fetch_next_others(
        &self,
        name: &str,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<FetchNextResponse<PspOther>> {
        self.ready(Capability::FetchOthers)?;
        self.engine(&FetchKind::Others(name.to_string()))
            .fetch_next(from_payload, cancel, |req| async move {
                let resp = self.plugin.fetch_next_others(name, req).await?;
                self.storage.store_others(&self.name, name, &resp.items).await?;
                Ok(resp)
            })
            .await
    }

    /// Run one page of a workflow task. Items come back as JSON so they can
    /// be handed to child tasks as `from_payload`.
    async fn fetch_task_page(
        &self,
        task: &TaskType,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> PluginResult<(Vec<Value>, bool)> {
        fn values<T: serde::Serialize>(resp: FetchNextResponse<T>) -> PluginResult<(Vec<Value>, bool)> {
            let items = resp
                .items
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((items, resp.has_more))
        }

        match task {
            TaskType::FetchAccounts => values(self.fetch_next_accounts(from_payload, cancel).await?),
            TaskType::FetchExternalAccounts => {
                values(self.fetch_next_external_accounts(from_payload, cancel).await?)
            }
            TaskType::FetchBalances => values(self.fetch_next_balances(from_payload, cancel).await?),
            TaskType::FetchPayments => values(self.fetch_next_payments(from_payload, cancel).await?),
            TaskType::FetchOrders => values(self.fetch_next_orders(from_payload, cancel).await?),
            TaskType::FetchConversions => {
                values(self.fetch_next_conversions(from_payload, cancel).await?)
            }
            TaskType::FetchOthers { name } => {
                values(self.fetch_next_others(name, from_payload, cancel).await?)
            }
            TaskType::CreateWebhooks => {
                let configs = self.create_webhooks(from_payload.cloned()).await?;
                let items = configs
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((items, false))
            }
        }
    }

    /// Run the installed workflow once, depth first.
    ///
    /// Every item a fetch task produces becomes the `from_payload` of each
    /// of its child tasks. Scopes that are already exhausted cost no
    /// provider call.
    pub async fn run_workflow(&self, cancel: &CancellationToken) -> PluginResult<SyncReport> {
        let workflow = match self.lifecycle.state() {
            LifecycleState::Installed { workflow, .. } => workflow,
            LifecycleState::Uninstalled => return Err(PluginError::NotYetInstalled),
        };

        let mut report = SyncReport::default();
        let mut pending: Vec<(ConnectorTaskTree, Option<Value>)> =
            workflow.into_iter().rev().map(|t| (t, None)).collect();

        while let Some((task, from_payload)) = pending.pop() {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            report.tasks_run += 1;

            let mut produced = Vec::new();
            loop {
                let (items, has_more) = self
                    .fetch_task_page(&task.task, from_payload.as_ref(), cancel)
                    .await?;
                produced.extend(items);
                if !has_more {
                    break;
                }
            }
            *report.items.entry(task.name.clone()).or_default() += produced.len();
            debug!(connector = %self.name, task = %task.name, items = produced.len(), "Task done");

            for item in produced.iter().rev() {
                for child in task.next_tasks.iter().rev() {
                    pending.push((child.clone(), Some(item.clone())));
                }
            }
        }

        info!(connector = %self.name, tasks = report.tasks_run, "Workflow cycle complete");
        Ok(report)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create_bank_account(&self, req: CreateBankAccountRequest) -> PluginResult<PspAccount> {
        self.ready(Capability::CreateBankAccount)?;
        let resp = self.plugin.create_bank_account(req).await?;
        resp.related_account.validate()?;
        self.storage
            .store_external_accounts(&self.name, std::slice::from_ref(&resp.related_account))
            .await?;
        Ok(resp.related_account)
    }

    pub async fn create_transfer(&self, req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        self.ready(Capability::CreateTransfer)?;
        req.payment_initiation.validate()?;
        let created = self.plugin.create_transfer(req).await?;
        self.store_created(&created).await?;
        Ok(created)
    }

    pub async fn reverse_transfer(&self, req: ReversalRequest) -> PluginResult<PspPayment> {
        self.ready(Capability::ReverseTransfer)?;
        let payment = self.plugin.reverse_transfer(req).await?;
        self.store_payment(&payment).await?;
        Ok(payment)
    }

    pub async fn poll_transfer_status(&self, transfer_id: &str) -> PluginResult<PollStatusResponse> {
        self.ready(Capability::PollTransferStatus)?;
        let resp = self.plugin.poll_transfer_status(transfer_id).await?;
        if let Some(payment) = &resp.payment {
            self.store_payment(payment).await?;
        }
        Ok(resp)
    }

    pub async fn create_payout(&self, req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        self.ready(Capability::CreatePayout)?;
        req.payment_initiation.validate()?;
        let created = self.plugin.create_payout(req).await?;
        self.store_created(&created).await?;
        Ok(created)
    }

    pub async fn reverse_payout(&self, req: ReversalRequest) -> PluginResult<PspPayment> {
        self.ready(Capability::ReversePayout)?;
        let payment = self.plugin.reverse_payout(req).await?;
        self.store_payment(&payment).await?;
        Ok(payment)
    }

    pub async fn poll_payout_status(&self, payout_id: &str) -> PluginResult<PollStatusResponse> {
        self.ready(Capability::PollPayoutStatus)?;
        let resp = self.plugin.poll_payout_status(payout_id).await?;
        if let Some(payment) = &resp.payment {
            self.store_payment(payment).await?;
        }
        Ok(resp)
    }

    pub async fn create_order(&self, req: CreateOrderRequest) -> PluginResult<CreateOrderResponse> {
        self.ready(Capability::CreateOrder)?;
        let resp = self.plugin.create_order(req).await?;
        if let Some(order) = &resp.order {
            order.validate()?;
            self.storage
                .store_orders(&self.name, std::slice::from_ref(order))
                .await?;
        }
        Ok(resp)
    }

    pub async fn cancel_order(&self, order_id: &str) -> PluginResult<PspOrder> {
        self.ready(Capability::CancelOrder)?;
        let order = self.plugin.cancel_order(order_id).await?;
        self.storage
            .store_orders(&self.name, std::slice::from_ref(&order))
            .await?;
        Ok(order)
    }

    pub async fn create_conversion(
        &self,
        req: CreateConversionRequest,
    ) -> PluginResult<CreateConversionResponse> {
        self.ready(Capability::CreateConversion)?;
        let resp = self.plugin.create_conversion(req).await?;
        if let Some(conversion) = &resp.conversion {
            conversion.validate()?;
            self.storage
                .store_conversions(&self.name, std::slice::from_ref(conversion))
                .await?;
        }
        Ok(resp)
    }

    async fn store_created(&self, created: &CreatedPayment) -> PluginResult<()> {
        match created {
            CreatedPayment::Completed(payment) => self.store_payment(payment).await,
            CreatedPayment::Polling(id) => {
                debug!(connector = %self.name, polling_id = %id, "Payment pending, poll for status");
                Ok(())
            }
        }
    }

    async fn store_payment(&self, payment: &PspPayment) -> PluginResult<()> {
        payment.validate()?;
        self.storage
            .store_payments(&self.name, std::slice::from_ref(payment))
            .await
    }

    // ========================================================================
    // Open banking
    // ========================================================================

    pub async fn create_user(&self, req: CreateUserRequest) -> PluginResult<CreateUserResponse> {
        self.ready(Capability::CreateUser)?;
        self.plugin.create_user(req).await
    }

    pub async fn create_user_link(&self, mut req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        self.ready(Capability::CreateUserLink)?;
        req.webhook_base_url = self.webhook_base_url.clone();
        self.plugin.create_user_link(req).await
    }

    pub async fn complete_user_link(
        &self,
        req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        self.ready(Capability::CompleteUserLink)?;
        self.plugin.complete_user_link(req).await
    }

    pub async fn update_user_link(&self, mut req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        self.ready(Capability::UpdateUserLink)?;
        req.webhook_base_url = self.webhook_base_url.clone();
        self.plugin.update_user_link(req).await
    }

    pub async fn complete_update_user_link(
        &self,
        req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        self.ready(Capability::CompleteUpdateUserLink)?;
        self.plugin.complete_update_user_link(req).await
    }

    pub async fn delete_user_connection(&self, req: DeleteUserConnectionRequest) -> PluginResult<()> {
        self.ready(Capability::DeleteUserConnection)?;
        self.plugin.delete_user_connection(req).await
    }

    pub async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<()> {
        self.ready(Capability::DeleteUser)?;
        self.plugin.delete_user(req).await
    }

    // ========================================================================
    // Webhooks
    // ========================================================================

    /// Run one inbound delivery through verify → dedup → trim → translate,
    /// then apply the events to storage.
    ///
    /// A verification failure stops the pipeline. A redelivery of an
    /// already processed envelope returns no events.
    pub async fn handle_webhook(
        &self,
        url_path: &str,
        webhook: PspWebhook,
    ) -> PluginResult<Vec<WebhookEvent>> {
        self.ready(Capability::TranslateWebhook)?;
        self.capabilities.require(Capability::VerifyWebhook)?;

        let config = self
            .lifecycle
            .installed_webhooks()?
            .into_iter()
            .find(|c| c.url_path == url_path)
            .ok_or_else(|| {
                PluginError::InvalidRequest(format!("no webhook registered for {}", url_path))
            })?;

        let verified = self
            .plugin
            .verify_webhook(VerifyWebhookRequest {
                full_url: webhook::full_url(&self.webhook_base_url, &config.url_path),
                config: config.clone(),
                webhook: webhook.clone(),
            })
            .await
            .inspect_err(|err| {
                warn!(connector = %self.name, webhook = %config.name, error = %err, code = err.code(), "Webhook rejected");
            })?;

        let key = verified
            .webhook_idempotency_key
            .unwrap_or_else(|| webhook::idempotency_key(&config.name, &webhook.body));
        if !self.storage.mark_webhook_seen(&self.name, &key).await? {
            info!(connector = %self.name, webhook = %config.name, key = %key, "Duplicate delivery ignored");
            return Ok(Vec::new());
        }

        match self.process_webhook(&config, webhook).await {
            Ok(events) => Ok(events),
            Err(err) => {
                if let Err(forget) = self.storage.forget_webhook(&self.name, &key).await {
                    warn!(connector = %self.name, key = %key, error = %forget, "Could not release webhook key");
                }
                Err(err)
            }
        }
    }

    async fn process_webhook(
        &self,
        config: &WebhookConfig,
        webhook: PspWebhook,
    ) -> PluginResult<Vec<WebhookEvent>> {
        let pieces = if self.capabilities.contains(Capability::TrimWebhook) {
            self.plugin
                .trim_webhook(TrimWebhookRequest {
                    config: config.clone(),
                    webhook,
                })
                .await?
                .webhooks
        } else {
            vec![webhook]
        };

        let mut events = Vec::new();
        for piece in pieces {
            let resp = self
                .plugin
                .translate_webhook(TranslateWebhookRequest {
                    name: config.name.clone(),
                    webhook: piece,
                })
                .await?;
            webhook::check_ordering(&resp.events)?;
            events.extend(resp.events);
        }

        self.apply_events(&events).await?;
        debug!(connector = %self.name, webhook = %config.name, events = events.len(), "Webhook applied");
        Ok(events)
    }

    async fn apply_events(&self, events: &[WebhookEvent]) -> PluginResult<()> {
        for event in events {
            match event {
                WebhookEvent::Account(account) => {
                    self.storage
                        .store_accounts(&self.name, std::slice::from_ref(account))
                        .await?
                }
                WebhookEvent::ExternalAccount(account) => {
                    self.storage
                        .store_external_accounts(&self.name, std::slice::from_ref(account))
                        .await?
                }
                WebhookEvent::Payment(payment) => {
                    self.storage
                        .store_payments(&self.name, std::slice::from_ref(payment))
                        .await?
                }
                WebhookEvent::PaymentToDelete { reference } => {
                    self.storage.delete_payment(&self.name, reference).await?
                }
                WebhookEvent::Balance(balance) => {
                    self.storage
                        .store_balances(&self.name, std::slice::from_ref(balance))
                        .await?
                }
                WebhookEvent::Order(order) => {
                    self.storage
                        .store_orders(&self.name, std::slice::from_ref(order))
                        .await?
                }
                other => {
                    info!(connector = %self.name, event = other.kind(), "Event forwarded to orchestration");
                }
            }
        }
        Ok(())
    }
}

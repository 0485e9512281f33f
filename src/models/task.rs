use serde::{Deserialize, Serialize};

/// One step of the workflow a connector asks the scheduler to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskType {
    FetchAccounts,
    FetchExternalAccounts,
    FetchBalances,
    FetchPayments,
    FetchOrders,
    FetchConversions,
    FetchOthers { name: String },
    CreateWebhooks,
}

/// Workflow tree returned by install.
///
/// Each item produced by a fetch task is handed to its `next_tasks` as their
/// `from_payload`, so balances run once per fetched account, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorTaskTree {
    pub task: TaskType,
    pub name: String,
    pub periodically: bool,
    #[serde(default)]
    pub next_tasks: Vec<ConnectorTaskTree>,
}

impl ConnectorTaskTree {
    pub fn new(name: impl Into<String>, task: TaskType) -> Self {
        Self {
            task,
            name: name.into(),
            periodically: true,
            next_tasks: Vec::new(),
        }
    }

    pub fn once(mut self) -> Self {
        self.periodically = false;
        self
    }

    pub fn then(mut self, child: ConnectorTaskTree) -> Self {
        self.next_tasks.push(child);
        self
    }

    /// Depth-first iterator over every task in the tree.
    pub fn walk(&self) -> Vec<&ConnectorTaskTree> {
        let mut out = vec![self];
        for child in &self.next_tasks {
            out.extend(child.walk());
        }
        out
    }
}

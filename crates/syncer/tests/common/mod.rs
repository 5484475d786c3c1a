#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use syncer::{MemoryBackend, MemoryParams};
use tokio::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub foo: i32,
    pub bar: String,
}

impl Item {
    pub fn new(foo: i32, bar: &str) -> Self {
        Self {
            foo,
            bar: bar.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub ints: Vec<i32>,
    pub items: BTreeMap<String, Item>,
    pub baz: i32,
}

pub fn req() -> MemoryParams {
    MemoryParams::new("state-req")
}

pub fn publish() -> MemoryParams {
    MemoryParams::new("state-pub")
}

pub fn backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_connect_period(Duration::from_millis(20))
        .with_wait_timeout(Duration::from_millis(20))
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Outlast the beacon a freshly bound server broadcasts after the connect
/// period, so that it cannot interleave with the updates under test.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

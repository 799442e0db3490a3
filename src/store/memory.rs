// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/store/memory.rs - 内存存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  store::{
    CategoryId, ExistingItem, Inventory, ItemStore, MappingSnapshot, MappingStore, StoreError,
  },
};

#[derive(Debug, Default)]
pub struct MemoryStore {
  inventory: RwLock<Inventory>,
}

impl FromUrlWithScheme for MemoryStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(MemoryStore::default())
  }
}

impl From<Inventory> for MemoryStore {
  fn from(inventory: Inventory) -> Self {
    Self {
      inventory: RwLock::new(inventory),
    }
  }
}

impl MemoryStore {
  fn poisoned() -> StoreError {
    StoreError::Unavailable("内存存储锁已失效".to_string())
  }
}

impl MappingStore for MemoryStore {
  fn snapshot(&self) -> Result<MappingSnapshot, StoreError> {
    let inventory = self.inventory.read().map_err(|_| Self::poisoned())?;
    Ok(inventory.snapshot())
  }

  fn upsert(&self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError> {
    let mut inventory = self.inventory.write().map_err(|_| Self::poisoned())?;
    inventory.upsert(object_name, category_id)?;
    debug!("更新映射: {} -> {}", object_name, category_id);
    Ok(())
  }
}

impl ItemStore for MemoryStore {
  fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError> {
    let inventory = self.inventory.read().map_err(|_| Self::poisoned())?;
    Ok(inventory.items_by_category(category_ids))
  }
}

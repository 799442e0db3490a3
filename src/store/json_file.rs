// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/store/json_file.rs - JSON 文件存储
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
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  store::{
    CategoryId, ExistingItem, Inventory, ItemStore, MappingSnapshot, MappingStore, StoreError,
  },
};

/// 以单个 JSON 文件保存的库存数据，每次读取都重新加载文件
pub struct JsonFileStore {
  path: PathBuf,
  write_lock: Mutex<()>,
}

impl FromUrlWithScheme for JsonFileStore {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(JsonFileStore::new(decode_url_path(url)))
  }
}

impl JsonFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn load(&self) -> Result<Inventory, StoreError> {
    let text = std::fs::read_to_string(&self.path).map_err(|e| {
      StoreError::Unavailable(format!("无法读取 {}: {}", self.path.display(), e))
    })?;
    let inventory: Inventory = serde_json::from_str(&text)?;
    debug!(
      "加载库存数据 {}: {} 个类别, {} 条映射, {} 个物品",
      self.path.display(),
      inventory.categories.len(),
      inventory.object_mappings.len(),
      inventory.items.len()
    );
    Ok(inventory)
  }

  fn save(&self, inventory: &Inventory) -> Result<(), StoreError> {
    let text = serde_json::to_string_pretty(inventory)?;
    let temp = self.path.with_extension("json.tmp");
    std::fs::write(&temp, text)?;
    std::fs::rename(&temp, &self.path)?;
    Ok(())
  }
}

impl MappingStore for JsonFileStore {
  fn snapshot(&self) -> Result<MappingSnapshot, StoreError> {
    Ok(self.load()?.snapshot())
  }

  fn upsert(&self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|_| StoreError::Unavailable("写锁已失效".to_string()))?;

    let mut inventory = self.load()?;
    inventory.upsert(object_name, category_id)?;
    self.save(&inventory)?;
    info!("保存映射: {} -> {}", object_name.trim(), category_id);
    Ok(())
  }
}

impl ItemStore for JsonFileStore {
  fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError> {
    Ok(self.load()?.items_by_category(category_ids))
  }
}

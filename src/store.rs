// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/store.rs - 映射表与库存存储
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub type CategoryId = i64;

/// 对象名称到类别的映射快照（一次请求内只读取一次）
pub type MappingSnapshot = HashMap<String, CategoryRef>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
  pub category_name: String,
  pub category_id: CategoryId,
}

/// 某类别下已有的库存物品
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingItem {
  pub item_id: i64,
  pub name: String,
  pub quantity: i64,
}

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("存储不可用: {0}")]
  Unavailable(String),
  #[error("类别不存在: {0}")]
  UnknownCategory(CategoryId),
  #[error("对象名称无效: {0:?}")]
  InvalidObjectName(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("数据格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub trait MappingStore {
  /// 读取完整的 `object_name -> {category_name, category_id}` 表
  fn snapshot(&self) -> Result<MappingSnapshot, StoreError>;

  /// 按 `object_name` 唯一性插入或更新一条映射
  fn upsert(&self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError>;
}

pub trait ItemStore {
  /// 一次性读取多个类别下的物品，按类别分组
  fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub category_id: CategoryId,
  pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMapping {
  pub object_name: String,
  pub category_id: CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
  pub item_id: i64,
  pub name: String,
  pub category_id: CategoryId,
  #[serde(default)]
  pub quantity: i64,
}

/// 库存数据：类别、对象映射与物品三张表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
  #[serde(default)]
  pub categories: Vec<Category>,
  #[serde(default)]
  pub object_mappings: Vec<ObjectMapping>,
  #[serde(default)]
  pub items: Vec<Item>,
}

impl Inventory {
  fn category_name(&self, category_id: CategoryId) -> Option<&str> {
    self
      .categories
      .iter()
      .find(|category| category.category_id == category_id)
      .map(|category| category.category_name.as_str())
  }

  /// 映射与类别做内连接，指向不存在类别的映射不出现在快照中
  pub fn snapshot(&self) -> MappingSnapshot {
    self
      .object_mappings
      .iter()
      .filter_map(|mapping| {
        self.category_name(mapping.category_id).map(|name| {
          (
            mapping.object_name.clone(),
            CategoryRef {
              category_name: name.to_string(),
              category_id: mapping.category_id,
            },
          )
        })
      })
      .collect()
  }

  pub fn upsert(&mut self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError> {
    let object_name = object_name.trim();
    if object_name.is_empty() {
      return Err(StoreError::InvalidObjectName(object_name.to_string()));
    }
    if self.category_name(category_id).is_none() {
      return Err(StoreError::UnknownCategory(category_id));
    }

    match self
      .object_mappings
      .iter_mut()
      .find(|mapping| mapping.object_name == object_name)
    {
      Some(mapping) => mapping.category_id = category_id,
      None => self.object_mappings.push(ObjectMapping {
        object_name: object_name.to_string(),
        category_id,
      }),
    }
    Ok(())
  }

  pub fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> HashMap<CategoryId, Vec<ExistingItem>> {
    let mut grouped: HashMap<CategoryId, Vec<ExistingItem>> = HashMap::new();
    for item in self
      .items
      .iter()
      .filter(|item| category_ids.contains(&item.category_id))
    {
      grouped
        .entry(item.category_id)
        .or_default()
        .push(ExistingItem {
          item_id: item.item_id,
          name: item.name.clone(),
          quantity: item.quantity,
        });
    }
    grouped
  }
}

mod memory;
pub use self::memory::MemoryStore;

#[cfg(feature = "json_store")]
mod json_file;
#[cfg(feature = "json_store")]
pub use self::json_file::JsonFileStore;

pub enum StoreWrapper {
  Memory(MemoryStore),
  #[cfg(feature = "json_store")]
  JsonFile(JsonFileStore),
}

impl FromUrl for StoreWrapper {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      MemoryStore::SCHEME => Ok(StoreWrapper::Memory(MemoryStore::from_url(url)?)),
      #[cfg(feature = "json_store")]
      JsonFileStore::SCHEME => Ok(StoreWrapper::JsonFile(JsonFileStore::from_url(url)?)),
      other => Err(StoreError::SchemeMismatch(other.to_string())),
    }
  }
}

impl MappingStore for StoreWrapper {
  fn snapshot(&self) -> Result<MappingSnapshot, StoreError> {
    match self {
      StoreWrapper::Memory(store) => store.snapshot(),
      #[cfg(feature = "json_store")]
      StoreWrapper::JsonFile(store) => store.snapshot(),
    }
  }

  fn upsert(&self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError> {
    match self {
      StoreWrapper::Memory(store) => store.upsert(object_name, category_id),
      #[cfg(feature = "json_store")]
      StoreWrapper::JsonFile(store) => store.upsert(object_name, category_id),
    }
  }
}

impl ItemStore for StoreWrapper {
  fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError> {
    match self {
      StoreWrapper::Memory(store) => store.items_by_category(category_ids),
      #[cfg(feature = "json_store")]
      StoreWrapper::JsonFile(store) => store.items_by_category(category_ids),
    }
  }
}

impl<S: MappingStore + ?Sized> MappingStore for &S {
  fn snapshot(&self) -> Result<MappingSnapshot, StoreError> {
    (**self).snapshot()
  }

  fn upsert(&self, object_name: &str, category_id: CategoryId) -> Result<(), StoreError> {
    (**self).upsert(object_name, category_id)
  }
}

impl<S: ItemStore + ?Sized> ItemStore for &S {
  fn items_by_category(
    &self,
    category_ids: &BTreeSet<CategoryId>,
  ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError> {
    (**self).items_by_category(category_ids)
  }
}

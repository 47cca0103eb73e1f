//! # provider 模块说明
//!
//! ## 角色定位（Why）
//! - 实现集合供给（存储契约的 `get_collection`）：定位或创建命名空间对应族
//!   的集合，在首次创建时落地截断策略，并在散列模式下维护反查映射；
//! - 以 `DashMap` 记忆已供给的集合与已写入的反查记录，将热路径收敛到零次
//!   额外存储往返。
//!
//! ## 核心契约（What）
//! - `create = false` 且目标缺失 → [`SthError::CollectionNotFound`]；
//! - 截断策略只在首次创建时生效：体量封顶以 capped collection 落地，年龄
//!   过期以 `recvTime` 上的 TTL 索引落地（仅原始族，聚合桶以槽位语义自然
//!   滚动）；
//! - 反查记录以集合名为 `_id` 幂等插入，重复键视为已写入；
//! - 并发创建同一集合时，“命名空间已存在”是预期分支，不上抛。

use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use sth_core::namespace::{self, HashOriginRecord, HASH_ORIGIN_COLLECTION};
use sth_core::prelude::{
    CollectionHandle, Family, GetCollectionOptions, NameCodec, Namespace, SthError,
    TruncationPolicy,
};
use tracing::debug;

use crate::client::MongoStore;
use crate::error::{is_duplicate_key, is_namespace_exists, map_store_error};

pub(crate) async fn get_collection(
    store: &MongoStore,
    ns: &Namespace,
    options: &GetCollectionOptions,
) -> Result<CollectionHandle, SthError> {
    let database = namespace::database_name(&ns.service);
    let collection = namespace::resolve(ns, options.family, store.name_codec)?;
    let handle = CollectionHandle {
        database: database.clone(),
        collection: collection.clone(),
        family: options.family,
    };
    let memo_key = (database.clone(), collection.clone());
    if store.provisioned.contains_key(&memo_key) {
        return Ok(handle);
    }

    let db = store.client.database(&database);
    let existing = db
        .list_collection_names()
        .await
        .map_err(|err| map_store_error("list_collections", err))?;
    if !existing.contains(&collection) {
        if !options.create {
            return Err(SthError::CollectionNotFound { collection });
        }
        create_collection(store, &handle, options).await?;
        if options.store_hash && store.name_codec == NameCodec::Hash {
            record_hash_origin(store, ns, &handle).await?;
        }
    }

    store.provisioned.insert(memo_key, ());
    Ok(handle)
}

async fn create_collection(
    store: &MongoStore,
    handle: &CollectionHandle,
    options: &GetCollectionOptions,
) -> Result<(), SthError> {
    let db = store.client.database(&handle.database);
    let created = match options.truncation {
        TruncationPolicy::Size {
            max_bytes,
            max_documents,
        } => {
            let mut action = db
                .create_collection(&handle.collection)
                .capped(true)
                .size(max_bytes);
            if let Some(max) = max_documents {
                action = action.max(max);
            }
            action.await
        }
        TruncationPolicy::None | TruncationPolicy::Age { .. } => {
            db.create_collection(&handle.collection).await
        }
    };
    match created {
        Ok(()) => debug!(
            collection = %handle.collection,
            database = %handle.database,
            "collection created"
        ),
        Err(err) if is_namespace_exists(&err) => {
            // 并发创建竞态：他人先到，本次按已存在处理。
        }
        Err(err) => return Err(map_store_error("create_collection", err)),
    }

    if let (TruncationPolicy::Age { expire_after }, Family::Raw) =
        (options.truncation, handle.family)
    {
        let index = IndexModel::builder()
            .keys(doc! { "recvTime": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(expire_after)
                    .build(),
            )
            .build();
        db.collection::<mongodb::bson::Document>(&handle.collection)
            .create_index(index)
            .await
            .map_err(|err| map_store_error("create_index", err))?;
    }
    Ok(())
}

async fn record_hash_origin(
    store: &MongoStore,
    ns: &Namespace,
    handle: &CollectionHandle,
) -> Result<(), SthError> {
    let memo_key = (handle.database.clone(), handle.collection.clone());
    if store.hash_records.contains_key(&memo_key) {
        return Ok(());
    }

    let record = HashOriginRecord::new(handle.collection.clone(), ns, handle.family);
    let mut document = mongodb::bson::to_document(&record)
        .map_err(|err| SthError::store_with_cause("hash_mapping", "record encoding failed", err))?;
    // 集合名作为 `_id`，重复插入以重复键收敛为幂等。
    document.insert("_id", handle.collection.clone());

    let mapping = store
        .client
        .database(&handle.database)
        .collection::<mongodb::bson::Document>(HASH_ORIGIN_COLLECTION);
    match mapping.insert_one(document).await {
        Ok(_) => {}
        Err(err) if is_duplicate_key(&err) => {}
        Err(err) => return Err(map_store_error("hash_mapping", err)),
    }
    store.hash_records.insert(memo_key, ());
    Ok(())
}

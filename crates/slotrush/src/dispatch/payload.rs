// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enrollment form bodies, encoded once per item.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::workset::WorkItem;

/// Path of the direct enrollment endpoint.
pub const APPLY_PATH: &str = "/UcrTlsn/tlsnAplyDirect.do";

/// Default campus code.
pub const DEFAULT_CAMPUS: &str = "CMN001.0001";

/// URL-encode the enrollment form for one item.
pub fn encode_form(campus: &str, item: &WorkItem) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("_AUTH_MENU_KEY", "")
        .append_pair("@d1#strCampusRcd", campus)
        .append_pair("@d1#strSbjNo", &item.resource_id)
        .append_pair("@d1#strDivcls", &item.section)
        .append_pair("@d#", "@d1#")
        .append_pair("@d1#", "dmParamTlsnAplyDirect")
        .append_pair("@d1#tp", "dm")
        .finish()
}

/// Decoded value of `key` in a form body.
pub fn form_value(body: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(body.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

struct CachedPayload {
    section: String,
    body: Arc<str>,
}

/// Encoded bodies keyed by resource id. An entry is rebuilt only when the
/// item's section changes.
pub struct PayloadCache {
    campus: String,
    entries: Mutex<HashMap<String, CachedPayload>>,
}

impl PayloadCache {
    pub fn new(campus: impl Into<String>) -> Self {
        Self { campus: campus.into(), entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, item: &WorkItem) -> Arc<str> {
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(&item.resource_id) {
            if cached.section == item.section {
                return Arc::clone(&cached.body);
            }
        }
        let body: Arc<str> = encode_form(&self.campus, item).into();
        entries.insert(
            item.resource_id.clone(),
            CachedPayload { section: item.section.clone(), body: Arc::clone(&body) },
        );
        body
    }

    /// Build bodies for `items` ahead of time. Returns the cache size.
    pub fn warm<'a>(&self, items: impl IntoIterator<Item = &'a WorkItem>) -> usize {
        for item in items {
            self.get(item);
        }
        self.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

use async_trait::async_trait;

use super::AssetResolver;
use crate::error::ResolveError;

/// ID 本身就是可下载 URL
#[derive(Debug, Default, Clone)]
pub struct PassthroughResolver;

#[async_trait]
impl AssetResolver for PassthroughResolver {
    async fn resolve(&self, id: &str) -> Result<String, ResolveError> {
        if id.trim().is_empty() {
            return Err(ResolveError::NotFound(id.to_owned()));
        }
        Ok(id.to_owned())
    }
}

/// 把相对 ID 拼到存储桶基址上；绝对 URL 原样返回
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: String,
}

impl BaseUrlResolver {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl AssetResolver for BaseUrlResolver {
    async fn resolve(&self, id: &str) -> Result<String, ResolveError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ResolveError::NotFound(id.to_owned()));
        }
        if id.starts_with("http://") || id.starts_with("https://") {
            return Ok(id.to_owned());
        }
        let file_name = id.rsplit('/').next().unwrap_or(id);
        Ok(format!("{}/{}", self.base, urlencoding::encode(file_name)))
    }
}

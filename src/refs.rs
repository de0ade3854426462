//! Resolution of `HEAD` to a commit hash over the dumb transport.

use crate::error::{Error, Result};
use crate::fetch::{validate_relative_path, ObjectFetcher};
use crate::git::ObjectHash;

/// Default bound on symbolic hops before a chain is treated as a cycle.
pub const DEFAULT_MAX_HOPS: usize = 10;

const PACKED_REFS: &str = "packed-refs";

/// Contents of a ref file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefPointer {
    Direct(ObjectHash),
    Symbolic(String),
}

impl RefPointer {
    /// Parse `ref: <path>` or a bare hash; trailing whitespace is ignored.
    pub fn parse(content: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(content);
        let text = text.trim();
        if let Some(target) = text.strip_prefix("ref:") {
            let target = target.trim();
            validate_relative_path(target)?;
            return Ok(RefPointer::Symbolic(target.to_string()));
        }
        Ok(RefPointer::Direct(ObjectHash::parse(text)?))
    }
}

/// One ref file read while resolving, with the exact bytes served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefHop {
    pub path: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ResolvedRef {
    /// Ref files in the order they were read, starting with `HEAD`.
    pub hops: Vec<RefHop>,
    /// Symbolic ref that ended in `packed-refs` rather than a loose file.
    pub packed_ref: Option<String>,
    /// Raw `packed-refs` content when it was needed to resolve the chain.
    pub packed_refs: Option<Vec<u8>>,
    pub hash: ObjectHash,
}

impl ResolvedRef {
    /// The branch `HEAD` ultimately names, e.g. `refs/heads/main`.
    /// `None` for a detached `HEAD`.
    pub fn ref_path(&self) -> Option<&str> {
        self.packed_ref
            .as_deref()
            .or_else(|| self.hops.iter().skip(1).last().map(|hop| hop.path.as_str()))
    }
}

pub struct RefResolver {
    max_hops: usize,
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl RefResolver {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }

    /// Follow `HEAD` until a concrete hash is reached.
    pub async fn resolve<F: ObjectFetcher + ?Sized>(&self, fetcher: &F) -> Result<ResolvedRef> {
        let mut hops: Vec<RefHop> = Vec::new();
        let mut chain = vec!["HEAD".to_string()];
        let mut path = "HEAD".to_string();

        loop {
            let raw = match fetcher.fetch_ref(&path).await {
                Ok(raw) => raw,
                Err(e) if e.is_not_found() && !hops.is_empty() => {
                    return self.resolve_packed(fetcher, hops, path).await;
                }
                Err(e) => return Err(e),
            };

            let pointer = RefPointer::parse(&raw)?;
            tracing::debug!("{} -> {:?}", path, pointer);
            hops.push(RefHop {
                path: path.clone(),
                raw,
            });

            match pointer {
                RefPointer::Direct(hash) => {
                    tracing::info!("Resolved {} to {}", chain.join(" -> "), hash);
                    return Ok(ResolvedRef {
                        hops,
                        packed_ref: None,
                        packed_refs: None,
                        hash,
                    });
                }
                RefPointer::Symbolic(target) => {
                    let revisited = chain.contains(&target);
                    chain.push(target.clone());
                    if revisited || chain.len() > self.max_hops + 1 {
                        return Err(Error::RefCycle { chain });
                    }
                    path = target;
                }
            }
        }
    }

    async fn resolve_packed<F: ObjectFetcher + ?Sized>(
        &self,
        fetcher: &F,
        hops: Vec<RefHop>,
        target: String,
    ) -> Result<ResolvedRef> {
        let from = hops
            .last()
            .map(|hop| hop.path.clone())
            .unwrap_or_else(|| "HEAD".to_string());
        let dangling = || Error::DanglingRef {
            from: from.clone(),
            target: target.clone(),
        };

        let packed = match fetcher.fetch_ref(PACKED_REFS).await {
            Ok(packed) => packed,
            Err(e) if e.is_not_found() => return Err(dangling()),
            Err(e) => return Err(e),
        };

        let hash = lookup_packed_ref(&packed, &target).ok_or_else(dangling)?;
        tracing::info!("Resolved {} to {} via packed-refs", target, hash);
        Ok(ResolvedRef {
            hops,
            packed_ref: Some(target),
            packed_refs: Some(packed),
            hash,
        })
    }
}

/// Find `name` in `packed-refs` content (`<hash> <refname>` lines).
pub fn lookup_packed_ref(content: &[u8], name: &str) -> Option<ObjectHash> {
    String::from_utf8_lossy(content)
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, refname)| refname.trim() == name)
        .and_then(|(hash, _)| ObjectHash::parse(hash).ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    const HASH: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    struct MapFetcher(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl ObjectFetcher for MapFetcher {
        async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>> {
            self.0
                .get(path)
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }
    }

    fn fetcher(files: &[(&'static str, &'static str)]) -> MapFetcher {
        MapFetcher(files.iter().copied().collect())
    }

    #[tokio::test]
    async fn test_symbolic_head_with_trailing_whitespace() {
        let fetcher = fetcher(&[
            ("HEAD", "ref: refs/heads/master\n"),
            ("refs/heads/master", "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef \n\n"),
        ]);
        let resolved = RefResolver::default().resolve(&fetcher).await.unwrap();
        assert_eq!(resolved.hash.as_str(), HASH);
        assert_eq!(resolved.ref_path(), Some("refs/heads/master"));
        assert_eq!(resolved.hops.len(), 2);
        assert_eq!(resolved.hops[0].raw, b"ref: refs/heads/master\n");
    }

    #[tokio::test]
    async fn test_detached_head() {
        let fetcher = fetcher(&[("HEAD", "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\n")]);
        let resolved = RefResolver::default().resolve(&fetcher).await.unwrap();
        assert_eq!(resolved.hash.as_str(), HASH);
        assert_eq!(resolved.ref_path(), None);
    }

    #[tokio::test]
    async fn test_multiple_symbolic_hops() {
        let fetcher = fetcher(&[
            ("HEAD", "ref: refs/remotes/origin/HEAD\n"),
            ("refs/remotes/origin/HEAD", "ref: refs/remotes/origin/main\n"),
            ("refs/remotes/origin/main", HASH),
        ]);
        let resolved = RefResolver::default().resolve(&fetcher).await.unwrap();
        assert_eq!(resolved.hash.as_str(), HASH);
        assert_eq!(resolved.ref_path(), Some("refs/remotes/origin/main"));
    }

    #[tokio::test]
    async fn test_cycle() {
        let fetcher = fetcher(&[
            ("HEAD", "ref: refs/heads/a\n"),
            ("refs/heads/a", "ref: refs/heads/b\n"),
            ("refs/heads/b", "ref: refs/heads/a\n"),
        ]);
        let err = RefResolver::default().resolve(&fetcher).await.unwrap_err();
        match err {
            Error::RefCycle { chain } => {
                assert_eq!(chain, vec!["HEAD", "refs/heads/a", "refs/heads/b", "refs/heads/a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_hop_limit() {
        let fetcher = fetcher(&[
            ("HEAD", "ref: refs/heads/a\n"),
            ("refs/heads/a", "ref: refs/heads/b\n"),
            ("refs/heads/b", "ref: refs/heads/c\n"),
            ("refs/heads/c", HASH),
        ]);
        assert!(matches!(
            RefResolver::new(2).resolve(&fetcher).await,
            Err(Error::RefCycle { .. })
        ));
        assert!(RefResolver::new(3).resolve(&fetcher).await.is_ok());
    }

    #[tokio::test]
    async fn test_dangling_ref() {
        let fetcher = fetcher(&[("HEAD", "ref: refs/heads/gone\n")]);
        let err = RefResolver::default().resolve(&fetcher).await.unwrap_err();
        assert!(matches!(err, Error::DanglingRef { ref target, .. } if target == "refs/heads/gone"));
    }

    #[tokio::test]
    async fn test_packed_refs_fallback() {
        let fetcher = fetcher(&[
            ("HEAD", "ref: refs/heads/main\n"),
            (
                "packed-refs",
                "# pack-refs with: peeled fully-peeled sorted\n\
                 1111111111111111111111111111111111111111 refs/heads/dev\n\
                 deadbeefdeadbeefdeadbeefdeadbeefdeadbeef refs/heads/main\n\
                 ^2222222222222222222222222222222222222222\n",
            ),
        ]);
        let resolved = RefResolver::default().resolve(&fetcher).await.unwrap();
        assert_eq!(resolved.hash.as_str(), HASH);
        assert_eq!(resolved.ref_path(), Some("refs/heads/main"));
        assert!(resolved.packed_refs.is_some());
        assert_eq!(resolved.hops.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_head_is_not_found() {
        let fetcher = fetcher(&[]);
        assert!(RefResolver::default()
            .resolve(&fetcher)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_pointer_rejects_escaping_target() {
        assert!(RefPointer::parse(b"ref: ../../etc/passwd\n").is_err());
        assert!(RefPointer::parse(b"garbage").is_err());
    }
}

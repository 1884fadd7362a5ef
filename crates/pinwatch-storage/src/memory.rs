//! In-memory repository and catalog with the same transition semantics as
//! the Postgres backends. Used by pipeline tests and local dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use pinwatch_core::{Ad, AdInfo, AdStage, CatalogHit, Product};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{AdRepository, ProductCatalog, StoreError};

#[derive(Default)]
pub struct MemoryAdRepository {
    ads: Mutex<Vec<Ad>>,
}

impl MemoryAdRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored ad, in discovery order.
    pub async fn snapshot(&self) -> Vec<Ad> {
        self.ads.lock().await.clone()
    }
}

fn find_mut<'a>(ads: &'a mut [Ad], id: Uuid) -> Result<&'a mut Ad, StoreError> {
    ads.iter_mut()
        .find(|ad| ad.id == id)
        .ok_or(StoreError::NotFound(id))
}

#[async_trait]
impl AdRepository for MemoryAdRepository {
    async fn find_by_url(&self, url: &str) -> Result<Option<Ad>, StoreError> {
        let ads = self.ads.lock().await;
        Ok(ads.iter().find(|ad| ad.url == url).cloned())
    }

    async fn create(&self, url: &str) -> Result<Ad, StoreError> {
        let mut ads = self.ads.lock().await;
        if ads.iter().any(|ad| ad.url == url) {
            return Err(StoreError::DuplicateUrl(url.to_string()));
        }
        let ad = Ad::new(url);
        ads.push(ad.clone());
        Ok(ad)
    }

    async fn list_by_stage(
        &self,
        stage: AdStage,
        limit: Option<i64>,
    ) -> Result<Vec<Ad>, StoreError> {
        let ads = self.ads.lock().await;
        let mut selected: Vec<Ad> = ads.iter().filter(|ad| ad.stage == stage).cloned().collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = limit {
            selected.truncate(limit.max(0) as usize);
        }
        Ok(selected)
    }

    async fn list(&self, stage: Option<AdStage>, limit: i64) -> Result<Vec<Ad>, StoreError> {
        let ads = self.ads.lock().await;
        let mut selected: Vec<Ad> = ads
            .iter()
            .filter(|ad| stage.map_or(true, |s| ad.stage == s))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        selected.truncate(limit.max(0) as usize);
        Ok(selected)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.ads.lock().await.len() as i64)
    }

    async fn record_scraped(
        &self,
        id: Uuid,
        content: &str,
        scrape_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut ads = self.ads.lock().await;
        let ad = find_mut(&mut ads, id)?;
        if ad.stage != AdStage::New {
            return Err(StoreError::StageConflict { id, expected: "new" });
        }
        ad.content = Some(content.to_string());
        ad.scrape_id = scrape_id.map(str::to_string);
        ad.scraped_at = Some(Utc::now());
        ad.stage = AdStage::Scraped;
        Ok(())
    }

    async fn record_info(&self, id: Uuid, info: &AdInfo) -> Result<(), StoreError> {
        let mut ads = self.ads.lock().await;
        let ad = find_mut(&mut ads, id)?;
        if ad.stage != AdStage::Scraped {
            return Err(StoreError::StageConflict {
                id,
                expected: "scraped",
            });
        }
        ad.title = info.title.clone();
        ad.description = info.description.clone();
        ad.amount = info.amount;
        ad.currency = info.currency.clone();
        ad.city = info.city.clone();
        ad.zipcode = info.zipcode.clone();
        ad.seller = info.seller.clone();
        ad.seller_url = info.seller_url.clone();
        Ok(())
    }

    async fn record_identified(&self, id: Uuid, hit: &CatalogHit) -> Result<(), StoreError> {
        let mut ads = self.ads.lock().await;
        let ad = find_mut(&mut ads, id)?;
        if ad.stage != AdStage::Scraped || ad.ignored {
            return Err(StoreError::StageConflict {
                id,
                expected: "scraped",
            });
        }
        ad.product = Some(hit.name.clone());
        ad.manufacturer = hit.manufacturer.clone();
        ad.year = hit.year;
        ad.opdb_id = Some(hit.opdb_id.clone());
        ad.identified_at = Some(Utc::now());
        ad.stage = AdStage::Identified;
        Ok(())
    }

    async fn mark_ignored(&self, id: Uuid) -> Result<(), StoreError> {
        let mut ads = self.ads.lock().await;
        let ad = find_mut(&mut ads, id)?;
        if ad.stage.is_terminal() {
            return Err(StoreError::StageConflict {
                id,
                expected: "new or scraped",
            });
        }
        ad.ignored = true;
        ad.stage = AdStage::Ignored;
        Ok(())
    }

    async fn bump_retries(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut ads = self.ads.lock().await;
        let ad = find_mut(&mut ads, id)?;
        ad.retries += 1;
        Ok(ad.retries)
    }
}

#[derive(Default)]
pub struct MemoryProductCatalog {
    products: Mutex<HashMap<String, Product>>,
}

impl MemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductCatalog for MemoryProductCatalog {
    async fn get(&self, opdb_id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.products.lock().await.get(opdb_id).cloned())
    }

    async fn upsert_all(&self, products: &[Product]) -> Result<usize, StoreError> {
        let mut map = self.products.lock().await;
        for product in products {
            map.insert(product.opdb_id.clone(), product.clone());
        }
        Ok(products.len())
    }

    async fn list_all(&self) -> Result<Vec<Product>, StoreError> {
        let map = self.products.lock().await;
        let mut products: Vec<Product> = map.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn search(
        &self,
        query: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Product>, StoreError> {
        let needle = query.map(str::to_ascii_lowercase);
        let products = self
            .list_all()
            .await?
            .into_iter()
            .filter(|product| match &needle {
                Some(q) if !q.is_empty() => {
                    product.name.to_ascii_lowercase().contains(q)
                        || product
                            .shortname
                            .as_deref()
                            .is_some_and(|s| s.to_ascii_lowercase().contains(q))
                        || product
                            .manufacturer
                            .as_deref()
                            .is_some_and(|m| m.to_ascii_lowercase().contains(q))
                }
                _ => true,
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(products)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.products.lock().await.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> CatalogHit {
        CatalogHit {
            opdb_id: "G50L5-MdEON".into(),
            name: "Godzilla (Premium)".into(),
            manufacturer: Some("Stern".into()),
            year: Some(2021),
            score: 0.95,
        }
    }

    #[tokio::test]
    async fn urls_are_unique() {
        let repo = MemoryAdRepository::new();
        let url = "https://www.leboncoin.fr/ad/flipper/2811111111";
        repo.create(url).await.unwrap();
        let err = repo.create(url).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUrl(_)));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stage_listing_is_fifo_and_bounded() {
        let repo = MemoryAdRepository::new();
        for i in 0..5 {
            repo.create(&format!("https://www.leboncoin.fr/ad/flipper/{i}"))
                .await
                .unwrap();
        }
        let batch = repo.list_by_stage(AdStage::New, Some(2)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].created_at <= batch[1].created_at);
        assert!(batch[0].url.ends_with("/0"));
    }

    #[tokio::test]
    async fn scraped_content_is_never_reset() {
        let repo = MemoryAdRepository::new();
        let ad = repo
            .create("https://www.leboncoin.fr/ad/flipper/1")
            .await
            .unwrap();
        repo.record_scraped(ad.id, "# first", None).await.unwrap();

        let err = repo.record_scraped(ad.id, "# second", None).await.unwrap_err();
        assert!(matches!(err, StoreError::StageConflict { .. }));

        let stored = repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("# first"));
        assert_eq!(stored.stage, AdStage::Scraped);
    }

    #[tokio::test]
    async fn identified_and_ignored_are_mutually_exclusive() {
        let repo = MemoryAdRepository::new();
        let ad = repo
            .create("https://www.leboncoin.fr/ad/flipper/1")
            .await
            .unwrap();
        repo.record_scraped(ad.id, "# content", None).await.unwrap();
        repo.record_identified(ad.id, &hit()).await.unwrap();

        let err = repo.mark_ignored(ad.id).await.unwrap_err();
        assert!(matches!(err, StoreError::StageConflict { .. }));

        let stored = repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert_eq!(stored.opdb_id.as_deref(), Some("G50L5-MdEON"));
        assert!(!stored.ignored);
    }

    #[tokio::test]
    async fn ignored_ads_cannot_be_identified() {
        let repo = MemoryAdRepository::new();
        let ad = repo
            .create("https://www.leboncoin.fr/ad/flipper/1")
            .await
            .unwrap();
        repo.record_scraped(ad.id, "# content", None).await.unwrap();
        repo.mark_ignored(ad.id).await.unwrap();

        let err = repo.record_identified(ad.id, &hit()).await.unwrap_err();
        assert!(matches!(err, StoreError::StageConflict { .. }));

        let stored = repo.find_by_url(&ad.url).await.unwrap().unwrap();
        assert!(stored.ignored);
        assert!(stored.opdb_id.is_none());
    }

    #[tokio::test]
    async fn identify_requires_content() {
        let repo = MemoryAdRepository::new();
        let ad = repo
            .create("https://www.leboncoin.fr/ad/flipper/1")
            .await
            .unwrap();
        let err = repo.record_identified(ad.id, &hit()).await.unwrap_err();
        assert!(matches!(err, StoreError::StageConflict { .. }));
    }

    #[tokio::test]
    async fn retries_accumulate() {
        let repo = MemoryAdRepository::new();
        let ad = repo
            .create("https://www.leboncoin.fr/ad/flipper/1")
            .await
            .unwrap();
        assert_eq!(repo.bump_retries(ad.id).await.unwrap(), 1);
        assert_eq!(repo.bump_retries(ad.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn catalog_search_matches_name_and_manufacturer() {
        let catalog = MemoryProductCatalog::new();
        catalog
            .upsert_all(&[
                Product {
                    opdb_id: "G50L5-MdEON".into(),
                    ipdb_id: None,
                    name: "Godzilla (Premium)".into(),
                    shortname: None,
                    manufacturer: Some("Stern".into()),
                    kind: Some("ss".into()),
                    year: Some(2021),
                },
                Product {
                    opdb_id: "GRdZR-MQK1Z".into(),
                    ipdb_id: None,
                    name: "Medieval Madness".into(),
                    shortname: Some("MM".into()),
                    manufacturer: Some("Williams".into()),
                    kind: Some("ss".into()),
                    year: Some(1997),
                },
            ])
            .await
            .unwrap();

        let by_name = catalog.search(Some("godzilla"), 0, 10).await.unwrap();
        assert_eq!(by_name.len(), 1);
        let by_manufacturer = catalog.search(Some("williams"), 0, 10).await.unwrap();
        assert_eq!(by_manufacturer.len(), 1);
        assert_eq!(by_manufacturer[0].opdb_id, "GRdZR-MQK1Z");
        let all = catalog.search(None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}

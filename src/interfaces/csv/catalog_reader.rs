use crate::domain::product::{Product, ProductMetadata, ProductType};
use crate::error::{PurchaseError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    id: String,
    #[serde(rename = "type")]
    product_type: ProductType,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    available: Option<bool>,
}

impl From<CatalogRecord> for Product {
    fn from(record: CatalogRecord) -> Self {
        let mut product = Product::new(record.id, record.product_type);
        if let Some(price) = record.price {
            let currency = record.currency.unwrap_or_default();
            product = product.with_metadata(ProductMetadata {
                title: record.title.unwrap_or_default(),
                description: String::new(),
                price,
                localized_price: format!("{price} {currency}").trim().to_string(),
                currency,
            });
        }
        if record.available == Some(false) {
            product = product.unpurchasable();
        }
        product
    }
}

/// Reads a store catalog from CSV.
///
/// Expected columns are `id, type, price, currency, title, available`; all but the
/// first two may be left empty. A product without a price has no store metadata,
/// and one with `available = false` cannot be bought.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads the catalog, one product per record.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader
            .into_deserialize::<CatalogRecord>()
            .map(|result| result.map(Product::from).map_err(PurchaseError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_catalog() {
        let data = "id, type, price, currency, title, available\n\
                    gems_100, consumable, 0.99, USD, 100 Gems, true\n\
                    no_ads, non_consumable, , , ,\n\
                    vip, subscription, 4.99, EUR, VIP, false";
        let products: Vec<Product> = CatalogReader::new(data.as_bytes())
            .products()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(products.len(), 3);
        let gems = &products[0];
        assert_eq!(gems.product_type, ProductType::Consumable);
        let metadata = gems.metadata.as_ref().unwrap();
        assert_eq!(metadata.price, dec!(0.99));
        assert_eq!(metadata.localized_price, "0.99 USD");
        assert_eq!(metadata.title, "100 Gems");
        assert!(gems.purchasable);

        assert!(products[1].metadata.is_none());
        assert!(products[1].purchasable);
        assert!(!products[2].purchasable);
    }

    #[test]
    fn test_reader_short_records() {
        let data = "id, type\ngems_100, consumable";
        let products: Vec<Result<Product>> = CatalogReader::new(data.as_bytes()).products().collect();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].as_ref().unwrap().id, "gems_100");
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "id, type, price\ngems_100, gadget, 1.0\ngems_500, consumable, cheap";
        let results: Vec<Result<Product>> = CatalogReader::new(data.as_bytes()).products().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }
}

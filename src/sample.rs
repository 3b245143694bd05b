//! The sample dataset used by regression tests and the CLI.
//!
//! Three tables in the shape of a small shop:
//!
//! ```text
//! Orders ──product_id──▶ Products ◀──product_id── Reviews
//! ```

use rust_decimal::Decimal;

use crate::context::{FieldInfo, InMemoryCatalog};
use crate::execution::{CellValue, MemoryExecutor, TableData};
use crate::model::field::{FieldId, TableId};
use crate::model::query::StructuredQuery;
use crate::model::types::{TemporalType, ValueKind};

pub const ORDERS: TableId = TableId(1);
pub const PRODUCTS: TableId = TableId(2);
pub const REVIEWS: TableId = TableId(3);

/// Field ids of the sample tables.
pub mod fields {
    use crate::model::field::FieldId;

    pub const ORDERS_ID: FieldId = FieldId(100);
    pub const ORDERS_PRODUCT_ID: FieldId = FieldId(101);
    pub const ORDERS_SUBTOTAL: FieldId = FieldId(102);
    pub const ORDERS_TAX: FieldId = FieldId(103);
    pub const ORDERS_TOTAL: FieldId = FieldId(104);
    pub const ORDERS_DISCOUNT: FieldId = FieldId(105);
    pub const ORDERS_CREATED_AT: FieldId = FieldId(106);
    pub const ORDERS_QUANTITY: FieldId = FieldId(107);

    pub const PRODUCTS_ID: FieldId = FieldId(200);
    pub const PRODUCTS_TITLE: FieldId = FieldId(201);
    pub const PRODUCTS_CATEGORY: FieldId = FieldId(202);
    pub const PRODUCTS_PRICE: FieldId = FieldId(203);
    pub const PRODUCTS_RATING: FieldId = FieldId(204);

    pub const REVIEWS_ID: FieldId = FieldId(300);
    pub const REVIEWS_PRODUCT_ID: FieldId = FieldId(301);
    pub const REVIEWS_REVIEWER: FieldId = FieldId(302);
    pub const REVIEWS_RATING: FieldId = FieldId(303);
    pub const REVIEWS_BODY: FieldId = FieldId(304);
    pub const REVIEWS_CREATED_AT: FieldId = FieldId(305);
}

use fields::*;

fn field(id: FieldId, column: &str, kind: ValueKind) -> FieldInfo {
    FieldInfo::from_column(id.0, column, kind)
}

/// Schema of the sample tables.
pub fn catalog() -> InMemoryCatalog {
    let datetime = ValueKind::Temporal(TemporalType::DateTime);
    let date = ValueKind::Temporal(TemporalType::Date);

    InMemoryCatalog::new()
        .with_table(
            ORDERS.0,
            "Orders",
            vec![
                field(ORDERS_ID, "id", ValueKind::Numeric),
                field(ORDERS_PRODUCT_ID, "product_id", ValueKind::Numeric).references(PRODUCTS),
                field(ORDERS_SUBTOTAL, "subtotal", ValueKind::Numeric),
                field(ORDERS_TAX, "tax", ValueKind::Numeric),
                field(ORDERS_TOTAL, "total", ValueKind::Numeric),
                field(ORDERS_DISCOUNT, "discount", ValueKind::Numeric),
                field(ORDERS_CREATED_AT, "created_at", datetime),
                field(ORDERS_QUANTITY, "quantity", ValueKind::Numeric),
            ],
        )
        .with_table(
            PRODUCTS.0,
            "Products",
            vec![
                field(PRODUCTS_ID, "id", ValueKind::Numeric),
                field(PRODUCTS_TITLE, "title", ValueKind::String),
                field(PRODUCTS_CATEGORY, "category", ValueKind::String),
                field(PRODUCTS_PRICE, "price", ValueKind::Numeric),
                field(PRODUCTS_RATING, "rating", ValueKind::Numeric),
            ],
        )
        .with_table(
            REVIEWS.0,
            "Reviews",
            vec![
                field(REVIEWS_ID, "id", ValueKind::Numeric),
                field(REVIEWS_PRODUCT_ID, "product_id", ValueKind::Numeric).references(PRODUCTS),
                field(REVIEWS_REVIEWER, "reviewer", ValueKind::String),
                field(REVIEWS_RATING, "rating", ValueKind::Numeric),
                field(REVIEWS_BODY, "body", ValueKind::String),
                field(REVIEWS_CREATED_AT, "created_at", date),
            ],
        )
}

/// An empty query over Orders.
pub fn orders_query() -> StructuredQuery {
    StructuredQuery::new(ORDERS)
}

fn money(cents: i64) -> CellValue {
    CellValue::Number(Decimal::new(cents, 2))
}

fn int(n: i64) -> CellValue {
    CellValue::Number(Decimal::from(n))
}

fn orders() -> TableData {
    // id, product, subtotal, tax, total, discount, created at, quantity
    let rows: [(i64, i64, i64, i64, i64, Option<i64>, &str, i64); 10] = [
        (1, 1, 3765, 207, 3972, None, "2024-01-05T10:33:00", 2),
        (2, 2, 11093, 610, 11703, Some(642), "2024-01-17T19:12:45", 3),
        (3, 3, 5272, 290, 5562, None, "2024-02-02T08:05:10", 1),
        (4, 1, 10922, 601, 11523, None, "2024-02-14T14:48:00", 4),
        (5, 4, 28675, 1573, 30248, Some(1000), "2024-03-09T21:17:31", 5),
        (6, 2, 9882, 544, 10426, None, "2024-03-21T11:02:19", 2),
        (7, 5, 7399, 407, 7806, Some(350), "2024-04-03T16:40:00", 1),
        (8, 3, 14823, 815, 15638, None, "2024-04-28T09:15:44", 6),
        (9, 4, 2946, 162, 3108, None, "2024-05-11T23:59:59", 1),
        (10, 5, 14400, 792, 15192, None, "2024-05-30T07:30:00", 3),
    ];

    rows.into_iter().fold(
        TableData::new(Some(ORDERS_ID.0)),
        |table, (id, product, subtotal, tax, total, discount, created_at, quantity)| {
            table.row([
                (ORDERS_ID.0, int(id)),
                (ORDERS_PRODUCT_ID.0, int(product)),
                (ORDERS_SUBTOTAL.0, money(subtotal)),
                (ORDERS_TAX.0, money(tax)),
                (ORDERS_TOTAL.0, money(total)),
                (ORDERS_DISCOUNT.0, discount.map_or(CellValue::Null, money)),
                (ORDERS_CREATED_AT.0, CellValue::temporal(created_at)),
                (ORDERS_QUANTITY.0, int(quantity)),
            ])
        },
    )
}

fn products() -> TableData {
    let rows = [
        (1, "Rustic Paper Wallet", "Gizmo", 2946, 46),
        (2, "Small Marble Shoes", "Doohickey", 7008, 40),
        (3, "Synergistic Granite Chair", "Doohickey", 3539, 40),
        (4, "Enormous Aluminum Shirt", "Widget", 5734, 34),
        (5, "Heavy-Duty Silk Chair", "Gadget", 7399, 33),
    ];

    rows.into_iter().fold(
        TableData::new(Some(PRODUCTS_ID.0)),
        |table, (id, title, category, price, rating)| {
            table.row([
                (PRODUCTS_ID.0, int(id)),
                (PRODUCTS_TITLE.0, CellValue::string(title)),
                (PRODUCTS_CATEGORY.0, CellValue::string(category)),
                (PRODUCTS_PRICE.0, money(price)),
                (PRODUCTS_RATING.0, CellValue::Number(Decimal::new(rating, 1))),
            ])
        },
    )
}

fn reviews() -> TableData {
    let rows = [
        (1, 1, "christ", 5, "Ad perspiciatis quis et consectetur.", "2024-02-01"),
        (2, 1, "xavier", 4, "Reprehenderit sit ut eos.", "2024-03-14"),
        (3, 2, "cameron.nitzsche", 3, "Sed quod in ea.", "2024-03-20"),
        (4, 3, "barbara-shields", 5, "Voluptas qui aut molestiae.", "2024-04-02"),
        (5, 4, "christ", 2, "", "2024-05-19"),
    ];

    rows.into_iter().fold(
        TableData::new(Some(REVIEWS_ID.0)),
        |table, (id, product, reviewer, rating, body, created_at)| {
            table.row([
                (REVIEWS_ID.0, int(id)),
                (REVIEWS_PRODUCT_ID.0, int(product)),
                (REVIEWS_REVIEWER.0, CellValue::string(reviewer)),
                (REVIEWS_RATING.0, int(rating)),
                (REVIEWS_BODY.0, CellValue::string(body)),
                (REVIEWS_CREATED_AT.0, CellValue::temporal(created_at)),
            ])
        },
    )
}

/// An executor loaded with the sample rows.
pub fn executor() -> MemoryExecutor {
    MemoryExecutor::new(catalog())
        .with_table(ORDERS.0, orders())
        .with_table(PRODUCTS.0, products())
        .with_table(REVIEWS.0, reviews())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Catalog;

    #[test]
    fn test_display_names() {
        let catalog = catalog();
        let names: Vec<String> = catalog
            .table_fields(ORDERS)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert!(names.contains(&"Product ID".to_string()));
        assert!(names.contains(&"Created At".to_string()));
    }

    #[test]
    fn test_raw_orders() {
        let result = executor().run(&orders_query()).unwrap();
        assert_eq!(result.rows.len(), 10);
        assert_eq!(result.columns.len(), 8);
        assert_eq!(result.columns[4].name, "Total");
    }
}

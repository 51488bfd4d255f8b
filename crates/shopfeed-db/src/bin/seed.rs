//! # Demo Catalog Seeder
//!
//! Populates the catalog mirror tables with a small apparel catalog so the
//! feed worker has something to export during development.
//!
//! ## Usage
//! ```bash
//! # 200 configurable styles (default), each with size children
//! cargo run -p shopfeed-db --bin seed
//!
//! # Custom amount and database
//! cargo run -p shopfeed-db --bin seed -- --count 50 --db ./data/shopfeed.db
//! ```
//!
//! ## Generated Data
//! - One configurable parent per style: `{LINE}-{INDEX}`
//! - Simple children per size: `{LINE}-{INDEX}-{SIZE}`, linked to the parent
//! - Single-source stock rows and salable quantities for stock channel 1
//! - Two discount rules (percent off, free shipping over a minimum)

use chrono::NaiveDate;
use shopfeed_core::inventory::StockRecord;
use shopfeed_core::promotion::{
    CouponType, DiscountRule, FreeShipping, RuleCondition, SimpleAction,
};
use shopfeed_core::{CatalogProduct, ChangeMethod, Money, ProductType};
use shopfeed_db::{Database, DbConfig};
use std::collections::BTreeMap;
use std::env;

/// Product lines: (code, name, brand, category)
const LINES: &[(&str, &str, &str, &str)] = &[
    ("TEE", "Cotton Tee", "Northwind", "Apparel & Accessories > Clothing > Shirts & Tops"),
    ("HOOD", "Fleece Hoodie", "Northwind", "Apparel & Accessories > Clothing > Outerwear"),
    ("SOCK", "Wool Socks", "Fjell", "Apparel & Accessories > Clothing > Socks"),
    ("CAP", "Canvas Cap", "Fjell", "Apparel & Accessories > Clothing Accessories > Hats"),
];

const COLORS: &[&str] = &["Black", "White", "Navy", "Olive", "Rust"];

/// Size variants with price add-on in cents
const SIZES: &[(&str, i64)] = &[("S", 0), ("M", 0), ("L", 200), ("XL", 400)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./shopfeed_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Shopfeed Demo Catalog Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of styles to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./shopfeed_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Shopfeed Demo Catalog Seeder");
    println!("===============================");
    println!("Database: {}", db_path);
    println!("Styles:   {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating catalog...");

    let start = std::time::Instant::now();
    let mut next_id: i64 = 1;
    let mut created = Vec::new();

    for style in 0..count {
        let (code, name, brand, category) = LINES[style % LINES.len()];
        let color = COLORS[style % COLORS.len()];
        let base_price = 999 + ((style * 37) % 3000) as i64;

        let parent_id = next_id;
        next_id += 1;
        let parent_sku = format!("{}-{:04}", code, style);
        let parent = demo_product(
            parent_id,
            &parent_sku,
            ProductType::Configurable,
            &format!("{} {}", color, name),
            Money::from_cents(base_price),
            brand,
            category,
            color,
        );
        db.products().upsert(&parent).await?;

        for (size, addon) in SIZES {
            let child_id = next_id;
            next_id += 1;
            let child = demo_product(
                child_id,
                &format!("{}-{}", parent_sku, size),
                ProductType::Simple,
                &format!("{} {} {}", color, name, size),
                Money::from_cents(base_price + addon),
                brand,
                category,
                color,
            );
            db.products().upsert(&child).await?;
            db.products().add_link(parent_id, child_id).await?;

            let qty = ((style * 7 + child_id as usize) % 25) as i64;
            db.stock()
                .upsert_stock_item(StockRecord {
                    product_id: child_id,
                    qty,
                    is_in_stock: qty > 0,
                })
                .await?;
            db.stock().set_salable(1, &child.sku, qty, qty > 0).await?;
        }

        created.push(parent_id);

        if (style + 1) % 50 == 0 {
            println!("  Generated {} styles...", style + 1);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} products in {:?}", next_id - 1, elapsed);

    seed_rules(&db).await?;
    println!("✓ Added discount rules");

    // Everything starts out as a pending create, parents expanded to children
    let queued = db
        .change_queue()
        .enqueue_with_children(&created, ChangeMethod::Create)
        .await?;
    println!("✓ Queued {} creates", queued);

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn demo_product(
    entity_id: i64,
    sku: &str,
    type_id: ProductType,
    name: &str,
    price: Money,
    brand: &str,
    category: &str,
    color: &str,
) -> CatalogProduct {
    let slug = sku.to_lowercase();
    CatalogProduct {
        entity_id,
        sku: sku.to_string(),
        type_id,
        name: name.to_string(),
        description: Some(format!("<p>{} by <b>{}</b>.</p>", name, brand)),
        price,
        url: Some(format!("http://localhost/catalog/{}.html", slug)),
        image_url: Some(format!("http://localhost/media/catalog/{}.jpg", slug)),
        brand: Some(brand.to_string()),
        category: Some(category.to_string()),
        enabled: true,
        unit_value: None,
        unit_type: None,
        parent_sku: None,
        attributes: BTreeMap::from([("color".to_string(), color.to_string())]),
    }
}

async fn seed_rules(db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let spring = DiscountRule {
        rule_id: 1,
        name: "Spring Sale".to_string(),
        from_date: NaiveDate::from_ymd_opt(2026, 3, 1),
        to_date: None,
        uses_per_customer: 1,
        coupon_type: CouponType::SpecificCoupon,
        coupon_code: Some("SPRING15".to_string()),
        simple_action: SimpleAction::ByPercent,
        discount_amount: 1500,
        free_shipping: FreeShipping::None,
        conditions: vec![],
    };
    let shipping = DiscountRule {
        rule_id: 2,
        name: "Free Shipping over 50".to_string(),
        from_date: None,
        to_date: None,
        uses_per_customer: 0,
        coupon_type: CouponType::NoCoupon,
        coupon_code: None,
        simple_action: SimpleAction::ByPercent,
        discount_amount: 0,
        free_shipping: FreeShipping::ForShipment,
        conditions: vec![RuleCondition {
            attribute: "base_subtotal".to_string(),
            operator: ">=".to_string(),
            value: "50".to_string(),
        }],
    };

    db.rules().upsert("default", &spring, true).await?;
    db.rules().upsert("default", &shipping, true).await?;
    Ok(())
}

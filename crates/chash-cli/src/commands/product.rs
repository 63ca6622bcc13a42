//! Product commands.

use super::with_dispatcher;
use anyhow::Result;
use chash_proto::{NewProduct, Product};
use colored::Colorize;
use tarpc::context;

fn print(product: &Product) {
    println!("{} {}", "product".green().bold(), product.id.cyan());
    println!("  Name:  {}", product.name);
    println!("  Price: {:.2}", product.price);
    println!("  Stock: {}", product.stock_quantity);
}

pub fn create(addr: &str, name: String, price: f64, stock_quantity: u32) -> Result<()> {
    let request = NewProduct {
        name,
        price,
        stock_quantity,
    };
    with_dispatcher(addr, |client| async move {
        let product = client.create_product(context::current(), request).await??;
        print(&product);
        Ok(())
    })
}

pub fn get(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let product = client.get_product(context::current(), id).await??;
        print(&product);
        Ok(())
    })
}

pub fn update(
    addr: &str,
    id: &str,
    name: Option<String>,
    price: Option<f64>,
    stock_quantity: Option<u32>,
) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let mut product = client.get_product(context::current(), id).await??;
        if let Some(name) = name {
            product.name = name;
        }
        if let Some(price) = price {
            product.price = price;
        }
        if let Some(stock_quantity) = stock_quantity {
            product.stock_quantity = stock_quantity;
        }
        let product = client.update_product(context::current(), product).await??;
        print(&product);
        Ok(())
    })
}

pub fn delete(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        if client.delete_product(context::current(), id.clone()).await?? {
            println!("{} product {}", "deleted".green().bold(), id.cyan());
        } else {
            println!("{} product {} was not stored", "unchanged".yellow().bold(), id.cyan());
        }
        Ok(())
    })
}

pub fn list(addr: &str) -> Result<()> {
    with_dispatcher(addr, |client| async move {
        let mut products = client.list_products(context::current()).await??;
        products.sort_by(|a, b| a.name.cmp(&b.name));

        println!("{} ({})", "Products".green().bold(), products.len());
        for product in &products {
            let stock = if product.stock_quantity == 0 {
                "out of stock".red().to_string()
            } else {
                format!("{} in stock", product.stock_quantity)
            };
            println!(
                "  {}  {}  {:.2}  {}",
                product.id.cyan(),
                product.name,
                product.price,
                stock
            );
        }
        Ok(())
    })
}

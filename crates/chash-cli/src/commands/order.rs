//! Order commands.

use super::{format_millis, with_dispatcher};
use anyhow::Result;
use chash_proto::{NewOrder, Order};
use colored::Colorize;
use tarpc::context;

fn print(order: &Order) {
    println!("{} {}", "order".green().bold(), order.id.cyan());
    println!("  Customer: {}", order.customer_id);
    println!("  Total:    {:.2}", order.total_amount);
    println!("  Date:     {}", format_millis(order.order_date));
}

pub fn create(addr: &str, customer_id: String, total_amount: f64) -> Result<()> {
    let request = NewOrder {
        customer_id,
        total_amount,
    };
    with_dispatcher(addr, |client| async move {
        let order = client.create_order(context::current(), request).await??;
        print(&order);
        Ok(())
    })
}

pub fn get(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let order = client.get_order(context::current(), id).await??;
        print(&order);
        Ok(())
    })
}

pub fn update(
    addr: &str,
    id: &str,
    customer_id: Option<String>,
    total_amount: Option<f64>,
) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let mut order = client.get_order(context::current(), id).await??;
        if let Some(customer_id) = customer_id {
            order.customer_id = customer_id;
        }
        if let Some(total_amount) = total_amount {
            order.total_amount = total_amount;
        }
        let order = client.update_order(context::current(), order).await??;
        print(&order);
        Ok(())
    })
}

pub fn delete(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        if client.delete_order(context::current(), id.clone()).await?? {
            println!("{} order {}", "deleted".green().bold(), id.cyan());
        } else {
            println!("{} order {} was not stored", "unchanged".yellow().bold(), id.cyan());
        }
        Ok(())
    })
}

pub fn list(addr: &str) -> Result<()> {
    with_dispatcher(addr, |client| async move {
        let mut orders = client.list_orders(context::current()).await??;
        orders.sort_by_key(|o| o.order_date);

        let total: f64 = orders.iter().map(|o| o.total_amount).sum();
        println!(
            "{} ({}, total {:.2})",
            "Orders".green().bold(),
            orders.len(),
            total
        );
        for order in &orders {
            println!(
                "  {}  {:>10.2}  customer {}",
                order.id.cyan(),
                order.total_amount,
                order.customer_id.dimmed()
            );
        }
        Ok(())
    })
}

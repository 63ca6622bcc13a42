//! Customer commands.

use super::{format_millis, with_dispatcher};
use anyhow::Result;
use chash_proto::{Customer, NewCustomer};
use colored::Colorize;
use tarpc::context;

fn print(customer: &Customer) {
    println!("{} {}", "customer".green().bold(), customer.id.cyan());
    println!("  Name:    {}", customer.full_name);
    println!("  Email:   {}", customer.email);
    println!("  Phone:   {}", customer.phone_number);
    println!("  Created: {}", format_millis(customer.created_at));
}

pub fn create(addr: &str, full_name: String, email: String, phone_number: String) -> Result<()> {
    let request = NewCustomer {
        full_name,
        email,
        phone_number,
    };
    with_dispatcher(addr, |client| async move {
        let customer = client.create_customer(context::current(), request).await??;
        print(&customer);
        Ok(())
    })
}

pub fn get(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let customer = client.get_customer(context::current(), id).await??;
        print(&customer);
        Ok(())
    })
}

pub fn update(
    addr: &str,
    id: &str,
    full_name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let mut customer = client.get_customer(context::current(), id).await??;
        if let Some(full_name) = full_name {
            customer.full_name = full_name;
        }
        if let Some(email) = email {
            customer.email = email;
        }
        if let Some(phone_number) = phone_number {
            customer.phone_number = phone_number;
        }
        let customer = client.update_customer(context::current(), customer).await??;
        print(&customer);
        Ok(())
    })
}

pub fn delete(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        if client.delete_customer(context::current(), id.clone()).await?? {
            println!("{} customer {}", "deleted".green().bold(), id.cyan());
        } else {
            println!("{} customer {} was not stored", "unchanged".yellow().bold(), id.cyan());
        }
        Ok(())
    })
}

pub fn list(addr: &str) -> Result<()> {
    with_dispatcher(addr, |client| async move {
        let mut customers = client.list_customers(context::current()).await??;
        customers.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        println!("{} ({})", "Customers".green().bold(), customers.len());
        for customer in &customers {
            println!(
                "  {}  {} <{}> {}",
                customer.id.cyan(),
                customer.full_name,
                customer.email,
                customer.phone_number.dimmed()
            );
        }
        Ok(())
    })
}

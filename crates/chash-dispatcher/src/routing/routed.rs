//! Binding from each record type to its `NodeService` methods.

use crate::rpc::client::CallOutcome;
use async_trait::async_trait;
use chash_proto::{Customer, NodeServiceClient, Order, Product, Record};
use tarpc::context::Context;

/// A record the dispatcher can route to workers.
///
/// Each method issues exactly one worker call for this record's kind.
#[async_trait]
pub trait Routed: Record {
    async fn put(client: NodeServiceClient, ctx: Context, record: Self) -> CallOutcome<Self>;

    async fn fetch(client: NodeServiceClient, ctx: Context, id: String)
        -> CallOutcome<Option<Self>>;

    async fn replace(
        client: NodeServiceClient,
        ctx: Context,
        record: Self,
    ) -> CallOutcome<Option<Self>>;

    async fn remove(client: NodeServiceClient, ctx: Context, id: String) -> CallOutcome<bool>;

    async fn list(client: NodeServiceClient, ctx: Context) -> CallOutcome<Vec<Self>>;
}

macro_rules! routed {
    ($record:ty, $create:ident, $get:ident, $update:ident, $delete:ident, $list:ident) => {
        #[async_trait]
        impl Routed for $record {
            async fn put(
                client: NodeServiceClient,
                ctx: Context,
                record: Self,
            ) -> CallOutcome<Self> {
                client.$create(ctx, record).await
            }

            async fn fetch(
                client: NodeServiceClient,
                ctx: Context,
                id: String,
            ) -> CallOutcome<Option<Self>> {
                client.$get(ctx, id).await
            }

            async fn replace(
                client: NodeServiceClient,
                ctx: Context,
                record: Self,
            ) -> CallOutcome<Option<Self>> {
                client.$update(ctx, record).await
            }

            async fn remove(
                client: NodeServiceClient,
                ctx: Context,
                id: String,
            ) -> CallOutcome<bool> {
                client.$delete(ctx, id).await
            }

            async fn list(client: NodeServiceClient, ctx: Context) -> CallOutcome<Vec<Self>> {
                client.$list(ctx).await
            }
        }
    };
}

routed!(
    Customer,
    create_customer,
    get_customer,
    update_customer,
    delete_customer,
    list_customers
);
routed!(
    Order,
    create_order,
    get_order,
    update_order,
    delete_order,
    list_orders
);
routed!(
    Product,
    create_product,
    get_product,
    update_product,
    delete_product,
    list_products
);

//! bmb-db
//!
//! PostgreSQL implementation of the Order Store contract. The
//! compare-and-set transition is a single conditional `UPDATE` keyed on
//! `(order_id, version, state)`, so Postgres row-level serialization is the
//! only arbiter of concurrent writes — correct under any number of
//! independent app processes, with no extra coordination.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use bmb_orders::{
    legal_transition, Actor, LineItem, NewOrder, Order, OrderState, TransitionEvent,
};
use bmb_store::{AssigneePatch, OrderPatch, OrderStore, StoreError};

pub const ENV_DB_URL: &str = "BMB_DATABASE_URL";

/// Connect to Postgres using BMB_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// PgOrderStore
// ---------------------------------------------------------------------------

/// Postgres-backed [`OrderStore`].
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError> {
        let rows: Vec<(Uuid, i32)> = sqlx::query_as::<_, (Uuid, i32)>(
            "select item_id, qty from order_items where order_id = $1 order by line_no",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|(item_id, qty)| LineItem {
                item_id,
                qty: qty as u32,
            })
            .collect())
    }
}

const ORDER_COLUMNS: &str = "order_id, customer_id, delivery_address, delivery_phone, \
                             state, assignee, created_at, updated_at, version";

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn order_from_row(row: &PgRow, items: Vec<LineItem>) -> Result<Order, StoreError> {
    let state_raw: String = row.try_get("state").map_err(backend)?;
    Ok(Order {
        order_id: row.try_get("order_id").map_err(backend)?,
        customer_id: row.try_get("customer_id").map_err(backend)?,
        items,
        delivery_address: row.try_get("delivery_address").map_err(backend)?,
        delivery_phone: row.try_get("delivery_phone").map_err(backend)?,
        state: OrderState::parse(&state_raw).map_err(backend)?,
        assignee: row.try_get("assignee").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        version: row.try_get("version").map_err(backend)?,
    })
}

fn actor_from_parts(kind: &str, id: Uuid) -> Result<Actor, StoreError> {
    match kind {
        "CUSTOMER" => Ok(Actor::Customer(id)),
        "TEAM_MEMBER" => Ok(Actor::TeamMember(id)),
        "ADMIN" => Ok(Actor::Admin(id)),
        other => Err(StoreError::Backend(format!("unknown actor kind '{other}'"))),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(order_id))?;

        let items = self.load_items(order_id).await?;
        order_from_row(&row, items)
    }

    async fn create(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        if new_order.items.is_empty() {
            return Err(StoreError::EmptyOrder);
        }
        if let Some(item) = new_order.items.iter().find(|i| i.qty == 0) {
            return Err(StoreError::ZeroQuantityItem(item.item_id));
        }

        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            customer_id: new_order.customer_id,
            items: new_order.items,
            delivery_address: new_order.delivery_address,
            delivery_phone: new_order.delivery_phone,
            state: OrderState::Created,
            assignee: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            insert into orders (
              order_id, customer_id, delivery_address, delivery_phone,
              state, assignee, created_at, updated_at, version
            ) values ($1, $2, $3, $4, $5, null, $6, $7, 1)
            "#,
        )
        .bind(order.order_id)
        .bind(order.customer_id)
        .bind(&order.delivery_address)
        .bind(&order.delivery_phone)
        .bind(order.state.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for (line_no, item) in order.items.iter().enumerate() {
            sqlx::query(
                "insert into order_items (order_id, line_no, item_id, qty) values ($1, $2, $3, $4)",
            )
            .bind(order.order_id)
            .bind(line_no as i32)
            .bind(item.item_id)
            .bind(item.qty as i32)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        insert_event(
            &mut tx,
            order.order_id,
            OrderState::Created,
            OrderState::Created,
            Actor::Customer(order.customer_id),
            order.created_at,
            1,
        )
        .await?;

        tx.commit().await.map_err(backend)?;
        debug!(order_id = %order.order_id, "order row created");
        Ok(order)
    }

    async fn compare_and_transition(
        &self,
        order_id: Uuid,
        expected_version: i64,
        expected_state: OrderState,
        new_state: OrderState,
        patch: OrderPatch,
        actor: Actor,
    ) -> Result<Order, StoreError> {
        debug_assert!(
            legal_transition(expected_state, new_state),
            "caller requested an illegal transition {expected_state} -> {new_state}"
        );

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // One conditional UPDATE is the whole compare-and-set. RETURNING hands
        // back the exact row this call wrote; no row means the record either
        // vanished or no longer matches.
        let row: Option<PgRow> = match patch.assignee {
            AssigneePatch::Keep => sqlx::query(&format!(
                "update orders set state = $1, version = version + 1, updated_at = $2 \
                 where order_id = $3 and version = $4 and state = $5 \
                 returning {ORDER_COLUMNS}"
            ))
            .bind(new_state.as_str())
            .bind(now)
            .bind(order_id)
            .bind(expected_version)
            .bind(expected_state.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?,
            AssigneePatch::Set(team_member) => sqlx::query(&format!(
                "update orders set state = $1, version = version + 1, updated_at = $2, assignee = $6 \
                 where order_id = $3 and version = $4 and state = $5 \
                 returning {ORDER_COLUMNS}"
            ))
            .bind(new_state.as_str())
            .bind(now)
            .bind(order_id)
            .bind(expected_version)
            .bind(expected_state.as_str())
            .bind(team_member)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?,
            AssigneePatch::Clear => sqlx::query(&format!(
                "update orders set state = $1, version = version + 1, updated_at = $2, assignee = null \
                 where order_id = $3 and version = $4 and state = $5 \
                 returning {ORDER_COLUMNS}"
            ))
            .bind(new_state.as_str())
            .bind(now)
            .bind(order_id)
            .bind(expected_version)
            .bind(expected_state.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?,
        };

        let Some(row) = row else {
            // Disambiguate NotFound vs Conflict from the live row.
            let found: Option<(i64, String)> = sqlx::query_as::<_, (i64, String)>(
                "select version, state from orders where order_id = $1",
            )
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            return match found {
                None => Err(StoreError::NotFound(order_id)),
                Some((actual_version, actual_state_raw)) => Err(StoreError::Conflict {
                    order_id,
                    expected_version,
                    expected_state,
                    actual_version,
                    actual_state: OrderState::parse(&actual_state_raw).map_err(backend)?,
                }),
            };
        };

        insert_event(
            &mut tx,
            order_id,
            expected_state,
            new_state,
            actor,
            now,
            expected_version + 1,
        )
        .await?;

        // Items are read inside the transaction so the returned snapshot is
        // exactly the state this CAS produced, never a later transition.
        let item_rows: Vec<(Uuid, i32)> = sqlx::query_as::<_, (Uuid, i32)>(
            "select item_id, qty from order_items where order_id = $1 order by line_no",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;
        let items = item_rows
            .into_iter()
            .map(|(item_id, qty)| LineItem {
                item_id,
                qty: qty as u32,
            })
            .collect();
        let updated = order_from_row(&row, items)?;

        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn list_claimable(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where state = 'CREATED' order by created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut pool = Vec::with_capacity(rows.len());
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id").map_err(backend)?;
            let items = self.load_items(order_id).await?;
            pool.push(order_from_row(row, items)?);
        }
        Ok(pool)
    }

    async fn list_assigned(&self, team_member: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders \
             where assignee = $1 and state not in ('DELIVERED','CANCELLED') \
             order by created_at"
        ))
        .bind(team_member)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut assigned = Vec::with_capacity(rows.len());
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id").map_err(backend)?;
            let items = self.load_items(order_id).await?;
            assigned.push(order_from_row(row, items)?);
        }
        Ok(assigned)
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<TransitionEvent>, StoreError> {
        let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            "select exists (select 1 from orders where order_id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        if !exists {
            return Err(StoreError::NotFound(order_id));
        }

        let rows: Vec<(String, String, String, Uuid, DateTime<Utc>, i64)> =
            sqlx::query_as::<_, (String, String, String, Uuid, DateTime<Utc>, i64)>(
                "select from_state, to_state, actor_kind, actor_id, at, version \
                 from order_events where order_id = $1 order by event_id",
            )
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut events = Vec::with_capacity(rows.len());
        for (from_raw, to_raw, actor_kind, actor_id, at, version) in rows {
            events.push(TransitionEvent {
                order_id,
                from: OrderState::parse(&from_raw).map_err(backend)?,
                to: OrderState::parse(&to_raw).map_err(backend)?,
                actor: actor_from_parts(&actor_kind, actor_id)?,
                at,
                version,
            });
        }
        Ok(events)
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    from: OrderState,
    to: OrderState,
    actor: Actor,
    at: DateTime<Utc>,
    version: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into order_events (order_id, from_state, to_state, actor_kind, actor_id, at, version)
        values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(order_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(actor.kind())
    .bind(actor.id())
    .bind(at)
    .bind(version)
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

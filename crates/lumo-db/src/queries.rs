use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use lumo_types::models::{
    Conversation, Delivery, IntakeEntry, LastMessage, Message, Order, OrderStatus,
    Participant, Role, conversation_key,
};

use crate::documents::{self, SELECT_COLUMNS, map_row};
use crate::models::UserRow;
use crate::{Database, StoreError, timestamp};

pub const CONVERSATIONS: &str = "conversations";
pub const ORDERS: &str = "orders";

/// Fixed document id of the current delivery of an order.
pub const LATEST_DELIVERY: &str = "latest";

pub fn messages_collection(conversation_id: &str) -> String {
    format!("{}/{}/messages", CONVERSATIONS, conversation_id)
}

pub fn deliveries_collection(order_id: Uuid) -> String {
    format!("{}/{}/deliveries", ORDERS, order_id)
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        role: Role,
        display_name: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, role, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    username,
                    password_hash,
                    role.as_str(),
                    display_name,
                    timestamp(Utc::now())
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate {
                        what: format!("user {}", username),
                    }
                    .into())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Returns `false` if no such user.
    pub fn update_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        picture: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET display_name = COALESCE(?2, display_name),
                     picture = COALESCE(?3, picture)
                 WHERE id = ?1",
                rusqlite::params![id, display_name, picture],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Conversations --

    /// Create the conversation between `a` and `b` unless it already exists.
    ///
    /// Returns the conversation id and whether it was created by this call.
    /// An existing conversation is left untouched.
    pub fn get_or_create_conversation(
        &self,
        a: &Participant,
        b: &Participant,
    ) -> Result<(String, bool)> {
        let id = conversation_key(a.user_id, b.user_id);

        let (first, second) = if a.user_id <= b.user_id { (a, b) } else { (b, a) };
        let conversation = Conversation {
            id: id.clone(),
            participant_ids: vec![first.user_id, second.user_id],
            participants: vec![first.clone(), second.clone()],
            last_message: None,
            created_at: Utc::now(),
        };

        let created = self.with_conn(|conn| {
            documents::create_if_absent(conn, CONVERSATIONS, &id, &conversation)
        })?;
        debug!("Conversation {} (created: {})", id, created);
        Ok((id, created))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| documents::get_as(conn, CONVERSATIONS, id))
    }

    /// Conversations the user takes part in, most recently active first.
    pub fn list_conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE collection = ?1
                   AND EXISTS (
                       SELECT 1 FROM json_each(documents.data, '$.participant_ids')
                       WHERE json_each.value = ?2
                   )
                 ORDER BY updated_at DESC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![CONVERSATIONS, user_id.to_string()], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| documents::decode(&row?))
                .collect()
        })
    }

    // -- Messages --

    /// Append a message and refresh the conversation's last-message
    /// snapshot in one transaction.
    pub fn post_message(
        &self,
        conversation_id: &str,
        sender_id: Uuid,
        text: &str,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            sender_id,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let last = LastMessage {
            text: message.text.clone(),
            sender_id,
            sent_at: message.created_at,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            documents::insert_with_time(
                &tx,
                &messages_collection(conversation_id),
                &message.id.to_string(),
                &message,
                &timestamp(message.created_at),
            )?;
            documents::merge(
                &tx,
                CONVERSATIONS,
                conversation_id,
                &json!({ "last_message": last }),
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(message)
    }

    /// Newest first. `before` is an exclusive `(created_at, id)` cursor taken
    /// from the last message of the previous page; without an id every
    /// message at that exact time is excluded too.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<(DateTime<Utc>, Option<Uuid>)>,
    ) -> Result<Vec<Message>> {
        let collection = messages_collection(conversation_id);
        // Nothing sorts after "~", and every id sorts after "".
        let (bound_at, bound_id) = match before {
            Some((at, id)) => (timestamp(at), id.map(|id| id.to_string()).unwrap_or_default()),
            None => ("~".to_string(), String::new()),
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE collection = ?1 AND (created_at, id) < (?2, ?3)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![collection, bound_at, bound_id, limit],
                    map_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| documents::decode(&row?))
                .collect()
        })
    }

    // -- Orders --

    pub fn insert_order(&self, order: &Order) -> Result<()> {
        self.with_conn(|conn| {
            documents::insert_with_time(
                conn,
                ORDERS,
                &order.id.to_string(),
                order,
                &timestamp(order.created_at),
            )
        })
    }

    pub fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        self.with_conn(|conn| documents::get_as(conn, ORDERS, &id.to_string()))
    }

    /// Orders on the user's side of the marketplace, newest first.
    pub fn list_orders_for(&self, user_id: Uuid, role: Role) -> Result<Vec<Order>> {
        let path = match role {
            Role::Brand => "$.brand_id",
            Role::Creator => "$.creator_id",
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE collection = ?1 AND json_extract(data, ?2) = ?3
                 ORDER BY created_at DESC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![ORDERS, path, user_id.to_string()], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| documents::decode(&row?))
                .collect()
        })
    }

    /// Move an order to `next`, checking the transition.
    pub fn set_order_status(&self, order_id: Uuid, next: OrderStatus) -> Result<Order> {
        self.with_conn(|conn| update_order_status(conn, order_id, next))
    }

    // -- Deliveries --

    /// Write the delivery at the fixed `latest` key, replacing any earlier
    /// one. Does not touch the order; see `commit_delivery`.
    pub fn put_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.with_conn(|conn| write_delivery(conn, delivery))
    }

    pub fn get_delivery(&self, order_id: Uuid) -> Result<Option<Delivery>> {
        self.with_conn(|conn| {
            documents::get_as(conn, &deliveries_collection(order_id), LATEST_DELIVERY)
        })
    }

    /// Write the delivery and mark the order delivered in one transaction.
    /// If the status change is rejected the delivery write is rolled back.
    pub fn commit_delivery(&self, delivery: &Delivery) -> Result<Order> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            write_delivery(&tx, delivery)?;
            let order = update_order_status(&tx, delivery.order_id, OrderStatus::Delivered)?;
            tx.commit()?;
            Ok(order)
        })
    }

    // -- Intake --

    /// Append-only; returns the new entry id.
    pub fn append_intake(&self, entry: &IntakeEntry) -> Result<String> {
        self.with_conn(|conn| documents::add(conn, entry.source.collection(), entry))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is only ever a literal from this module.
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, role, display_name, picture, created_at
         FROM users WHERE {} = ?1",
        column
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                display_name: row.get(4)?,
                picture: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn write_delivery(conn: &Connection, delivery: &Delivery) -> Result<()> {
    documents::set(
        conn,
        &deliveries_collection(delivery.order_id),
        LATEST_DELIVERY,
        delivery,
    )
}

fn update_order_status(conn: &Connection, order_id: Uuid, next: OrderStatus) -> Result<Order> {
    let id = order_id.to_string();
    let mut order: Order =
        documents::get_as(conn, ORDERS, &id)?.ok_or_else(|| StoreError::NotFound {
            collection: ORDERS.to_string(),
            id: id.clone(),
        })?;

    if !order.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            order_id,
            from: order.status,
            to: next,
        }
        .into());
    }

    order.status = next;
    order.updated_at = Utc::now();
    documents::merge(
        conn,
        ORDERS,
        &id,
        &json!({ "status": order.status, "updated_at": order.updated_at }),
    )?;
    Ok(order)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumo_types::models::{DeliveryFile, IntakeSource};

    fn participant(role: Role, name: &str) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            picture: None,
        }
    }

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            title: "Lisbon reel".into(),
            description: String::new(),
            amount_cents: 50_000,
            currency: "EUR".into(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn delivery(order_id: Uuid) -> Delivery {
        Delivery {
            order_id,
            files: vec![DeliveryFile {
                name: "reel.mp4".into(),
                size: 3,
                content_type: "video/mp4".into(),
                url: "http://localhost/files/x".into(),
                storage_key: "x".into(),
                sha256: "00".into(),
                uploaded_at: Utc::now(),
            }],
            note: Some("final cut".into()),
            links: vec![],
            delivered_at: Utc::now(),
            status: OrderStatus::Delivered,
        }
    }

    #[test]
    fn conversation_is_shared_between_both_orders() {
        let db = Database::open_in_memory().unwrap();
        let creator = participant(Role::Creator, "Ana");
        let brand = participant(Role::Brand, "Acme Travel");

        let (id_ab, created_ab) = db.get_or_create_conversation(&creator, &brand).unwrap();
        let (id_ba, created_ba) = db.get_or_create_conversation(&brand, &creator).unwrap();

        assert_eq!(id_ab, id_ba);
        assert!(created_ab);
        assert!(!created_ba);
        assert_eq!(
            db.with_conn(|conn| documents::count(conn, CONVERSATIONS)).unwrap(),
            1
        );
    }

    #[test]
    fn existing_conversation_metadata_is_not_rewritten() {
        let db = Database::open_in_memory().unwrap();
        let creator = participant(Role::Creator, "Ana");
        let brand = participant(Role::Brand, "Acme Travel");
        db.get_or_create_conversation(&creator, &brand).unwrap();

        let mut renamed = creator.clone();
        renamed.name = "Ana B.".into();
        let (id, _) = db.get_or_create_conversation(&renamed, &brand).unwrap();

        let conversation = db.get_conversation(&id).unwrap().unwrap();
        assert!(conversation.participants.iter().any(|p| p.name == "Ana"));
        assert!(conversation.last_message.is_none());
    }

    #[test]
    fn posting_updates_last_message_and_lists_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let creator = participant(Role::Creator, "Ana");
        let brand = participant(Role::Brand, "Acme Travel");
        let (id, _) = db.get_or_create_conversation(&creator, &brand).unwrap();

        db.post_message(&id, brand.user_id, "Hi Ana").unwrap();
        let second = db.post_message(&id, creator.user_id, "Hello!").unwrap();

        let conversation = db.get_conversation(&id).unwrap().unwrap();
        let last = conversation.last_message.unwrap();
        assert_eq!(last.text, "Hello!");
        assert_eq!(last.sender_id, creator.user_id);

        let messages = db.list_messages(&id, 50, None).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Hello!");

        let older = db
            .list_messages(&id, 50, Some((second.created_at, Some(second.id))))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].text, "Hi Ana");
    }

    #[test]
    fn paging_keeps_messages_sharing_a_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let (id, _) = db
            .get_or_create_conversation(&participant(Role::Creator, "Ana"), &participant(Role::Brand, "Acme"))
            .unwrap();

        let at = Utc::now();
        db.with_conn(|conn| {
            for text in ["one", "two", "three"] {
                let message = Message {
                    id: Uuid::new_v4(),
                    conversation_id: id.clone(),
                    sender_id: Uuid::new_v4(),
                    text: text.into(),
                    created_at: at,
                };
                documents::insert_with_time(
                    conn,
                    &messages_collection(&id),
                    &message.id.to_string(),
                    &message,
                    &timestamp(at),
                )?;
            }
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.list_messages(&id, 1, cursor).unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some((last.created_at, Some(last.id)));
            seen.extend(page.into_iter().map(|m| m.text));
        }
        seen.sort();
        assert_eq!(seen, vec!["one", "three", "two"]);

        // A bare timestamp cursor skips everything at that instant.
        assert!(db.list_messages(&id, 10, Some((at, None))).unwrap().is_empty());
    }

    #[test]
    fn posting_to_missing_conversation_leaves_no_message() {
        let db = Database::open_in_memory().unwrap();
        let err = db.post_message("nope", Uuid::new_v4(), "hello").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
        assert!(db.list_messages("nope", 50, None).unwrap().is_empty());
    }

    #[test]
    fn conversations_are_listed_per_participant() {
        let db = Database::open_in_memory().unwrap();
        let creator = participant(Role::Creator, "Ana");
        let brand_a = participant(Role::Brand, "Acme");
        let brand_b = participant(Role::Brand, "Globex");
        db.get_or_create_conversation(&creator, &brand_a).unwrap();
        db.get_or_create_conversation(&creator, &brand_b).unwrap();

        assert_eq!(db.list_conversations_for(creator.user_id).unwrap().len(), 2);
        assert_eq!(db.list_conversations_for(brand_a.user_id).unwrap().len(), 1);
        assert!(db.list_conversations_for(Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn commit_delivery_marks_order_delivered() {
        let db = Database::open_in_memory().unwrap();
        let order = order(OrderStatus::InProgress);
        db.insert_order(&order).unwrap();

        let updated = db.commit_delivery(&delivery(order.id)).unwrap();
        assert_eq!(updated.status, OrderStatus::Delivered);
        assert_eq!(
            db.get_order(order.id).unwrap().unwrap().status,
            OrderStatus::Delivered
        );
        assert!(db.get_delivery(order.id).unwrap().is_some());
    }

    #[test]
    fn redelivery_overwrites_latest() {
        let db = Database::open_in_memory().unwrap();
        let order = order(OrderStatus::InProgress);
        db.insert_order(&order).unwrap();
        db.commit_delivery(&delivery(order.id)).unwrap();

        let mut second = delivery(order.id);
        second.note = Some("with subtitles".into());
        db.commit_delivery(&second).unwrap();

        let latest = db.get_delivery(order.id).unwrap().unwrap();
        assert_eq!(latest.note.as_deref(), Some("with subtitles"));
        let count = db
            .with_conn(|conn| documents::count(conn, &deliveries_collection(order.id)))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn commit_delivery_rolls_back_on_rejected_status() {
        let db = Database::open_in_memory().unwrap();
        let order = order(OrderStatus::Pending);
        db.insert_order(&order).unwrap();

        let err = db.commit_delivery(&delivery(order.id)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidTransition { .. })
        ));
        assert!(db.get_delivery(order.id).unwrap().is_none());
        assert_eq!(
            db.get_order(order.id).unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[test]
    fn separate_writes_can_leave_delivery_without_status() {
        let db = Database::open_in_memory().unwrap();
        let order = order(OrderStatus::Pending);
        db.insert_order(&order).unwrap();

        db.put_delivery(&delivery(order.id)).unwrap();
        assert!(db.set_order_status(order.id, OrderStatus::Delivered).is_err());

        // The first write stands on its own.
        assert!(db.get_delivery(order.id).unwrap().is_some());
        assert_eq!(
            db.get_order(order.id).unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[test]
    fn commit_delivery_for_missing_order_fails() {
        let db = Database::open_in_memory().unwrap();
        let order_id = Uuid::new_v4();
        assert!(db.commit_delivery(&delivery(order_id)).is_err());
        assert!(db.get_delivery(order_id).unwrap().is_none());
    }

    #[test]
    fn orders_are_listed_by_role() {
        let db = Database::open_in_memory().unwrap();
        let first = order(OrderStatus::Pending);
        let mut second = order(OrderStatus::Pending);
        second.brand_id = first.brand_id;
        db.insert_order(&first).unwrap();
        db.insert_order(&second).unwrap();

        assert_eq!(db.list_orders_for(first.brand_id, Role::Brand).unwrap().len(), 2);
        assert_eq!(db.list_orders_for(first.creator_id, Role::Creator).unwrap().len(), 1);
        assert!(db.list_orders_for(first.brand_id, Role::Creator).unwrap().is_empty());
    }

    #[test]
    fn intake_entries_append() {
        let db = Database::open_in_memory().unwrap();
        let mut fields = serde_json::Map::new();
        fields.insert("email".into(), json!("ana@example.com"));
        let entry = IntakeEntry {
            source: IntakeSource::Waitlist,
            fields,
            trips: vec![],
            created_at: Utc::now(),
        };

        let a = db.append_intake(&entry).unwrap();
        let b = db.append_intake(&entry).unwrap();
        assert_ne!(a, b);
        let count = |source: IntakeSource| {
            db.with_conn(|conn| documents::count(conn, source.collection()))
                .unwrap()
        };
        assert_eq!(count(IntakeSource::Waitlist), 2);
        assert_eq!(count(IntakeSource::Signup), 0);
    }

    #[test]
    fn duplicate_username_is_a_typed_error() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&Uuid::new_v4().to_string(), "ana", "hash", Role::Creator, "Ana")
            .unwrap();
        let err = db
            .create_user(&Uuid::new_v4().to_string(), "ana", "hash", Role::Brand, "Other")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn profile_round_trips_through_user_row() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "ana", "hash", Role::Creator, "Ana")
            .unwrap();
        assert!(db
            .update_profile(&id.to_string(), None, Some("https://cdn/ana.jpg"))
            .unwrap());

        let profile = db
            .get_user_by_id(&id.to_string())
            .unwrap()
            .unwrap()
            .to_profile()
            .unwrap();
        assert_eq!(profile.id, id);
        assert_eq!(profile.role, Role::Creator);
        assert_eq!(profile.display_name, "Ana");
        assert_eq!(profile.picture.as_deref(), Some("https://cdn/ana.jpg"));
    }
}

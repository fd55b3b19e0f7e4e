diesel::table! {
    stock_items (id) {
        id -> Uuid,
        product_id -> Uuid,
        variant_id -> Nullable<Uuid>,
        warehouse_id -> Uuid,
        quantity -> Int4,
        reserved_quantity -> Int4,
        available_quantity -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stock_reservations (id) {
        id -> Uuid,
        order_id -> Uuid,
        stock_item_id -> Uuid,
        quantity -> Int4,
        expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    stock_movements (id) {
        id -> Uuid,
        stock_item_id -> Uuid,
        movement_type -> Varchar,
        quantity -> Int4,
        reference -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    processed_commands (idempotency_key) {
        idempotency_key -> Varchar,
        command_id -> Uuid,
        result -> Nullable<Jsonb>,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(stock_reservations -> stock_items (stock_item_id));
diesel::joinable!(stock_movements -> stock_items (stock_item_id));

diesel::allow_tables_to_appear_in_same_query!(
    stock_items,
    stock_reservations,
    stock_movements,
    processed_commands,
);

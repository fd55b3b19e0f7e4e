diesel::table! {
    delivery_slots (id) {
        id -> Uuid,
        delivery_zone_id -> Uuid,
        date -> Date,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        capacity -> Int4,
        reserved -> Int4,
        available -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    delivery_reservations (id) {
        id -> Uuid,
        slot_id -> Uuid,
        order_id -> Uuid,
        expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(delivery_reservations -> delivery_slots (slot_id));

diesel::allow_tables_to_appear_in_same_query!(
    delivery_slots,
    delivery_reservations,
);

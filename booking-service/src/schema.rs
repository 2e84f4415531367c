diesel::table! {
    shops (id) {
        id -> Varchar,
        owner_id -> Varchar,
        name -> Varchar,
        location -> Varchar,
        owner_name -> Varchar,
        email -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    services (shop_id, id) {
        shop_id -> Varchar,
        id -> Varchar,
        name -> Varchar,
        price -> Numeric,
        category -> Nullable<Varchar>,
        duration -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    appointments (id) {
        id -> Uuid,
        customer_id -> Varchar,
        shop_id -> Varchar,
        services -> Jsonb,
        appointment_date -> Date,
        appointment_time -> Time,
        status -> Varchar,
        total_amount -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(services -> shops (shop_id));
diesel::joinable!(appointments -> shops (shop_id));

diesel::allow_tables_to_appear_in_same_query!(
    shops,
    services,
    appointments,
    outbox_events,
);

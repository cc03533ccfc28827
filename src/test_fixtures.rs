//! A small reference project (5 models) used across unit and
//! integration tests: `stg_orders`, `stg_customers`, `stg_payments`,
//! `fct_orders` (depends on stg_orders + stg_payments), `dim_customers`
//! (depends on stg_customers + fct_orders).

use serde_json::{json, Value};

pub fn jaffle_shop_manifest() -> Value {
    json!({
        "metadata": {
            "dbt_schema_version": "https://schemas.getdbt.com/dbt/manifest/v11.json",
            "dbt_version": "1.7.0",
            "adapter_type": "duckdb",
            "project_name": "jaffle_shop",
            "generated_at": "2026-01-01T00:00:00Z"
        },
        "nodes": {
            "model.jaffle_shop.stg_orders": {
                "resource_type": "model",
                "name": "stg_orders",
                "fqn": ["jaffle_shop", "staging", "stg_orders"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_orders.sql",
                "raw_code": "select * from {{ source('ecom', 'orders') }}",
                "compiled_code": "select * from raw.ecom.orders",
                "description": "Staged orders.",
                "config": {"materialized": "view", "tags": []},
                "tags": [],
                "columns": {
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "Primary key"},
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "FK to customers"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.orders"]}
            },
            "model.jaffle_shop.stg_customers": {
                "resource_type": "model",
                "name": "stg_customers",
                "fqn": ["jaffle_shop", "staging", "stg_customers"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_customers.sql",
                "raw_code": "select * from {{ source('ecom', 'customers') }}",
                "compiled_code": "select * from raw.ecom.customers",
                "description": "Staged customers.",
                "config": {"materialized": "view", "tags": []},
                "tags": [],
                "columns": {
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "Primary key"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.customers"]}
            },
            "model.jaffle_shop.stg_payments": {
                "resource_type": "model",
                "name": "stg_payments",
                "fqn": ["jaffle_shop", "staging", "stg_payments"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/staging/stg_payments.sql",
                "raw_code": "select * from {{ source('ecom', 'payments') }}",
                "compiled_code": "select * from raw.ecom.payments",
                "description": "Staged payments.",
                "config": {"materialized": "view", "tags": []},
                "tags": [],
                "columns": {
                    "payment_id": {"name": "payment_id", "data_type": "integer", "description": "Primary key"},
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "FK to orders"}
                },
                "depends_on": {"nodes": ["source.jaffle_shop.ecom.payments"]}
            },
            "model.jaffle_shop.fct_orders": {
                "resource_type": "model",
                "name": "fct_orders",
                "fqn": ["jaffle_shop", "marts", "fct_orders"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/marts/fct_orders.sql",
                "raw_code": "select * from {{ ref('stg_orders') }} join {{ ref('stg_payments') }} using (order_id)",
                "compiled_code": "select * from stg_orders join stg_payments using (order_id)",
                "description": "Order facts joined with payments.",
                "config": {"materialized": "table", "tags": ["finance"]},
                "tags": ["finance"],
                "columns": {
                    "order_id": {"name": "order_id", "data_type": "integer", "description": "Primary key"},
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "FK to customers"},
                    "amount": {"name": "amount", "data_type": "numeric", "description": "Total paid"}
                },
                "depends_on": {
                    "nodes": [
                        "model.jaffle_shop.stg_orders",
                        "model.jaffle_shop.stg_payments"
                    ]
                }
            },
            "model.jaffle_shop.dim_customers": {
                "resource_type": "model",
                "name": "dim_customers",
                "fqn": ["jaffle_shop", "marts", "dim_customers"],
                "package_name": "jaffle_shop",
                "original_file_path": "models/marts/dim_customers.sql",
                "raw_code": "select * from {{ ref('stg_customers') }} join {{ ref('fct_orders') }} using (customer_id)",
                "compiled_code": "select * from stg_customers join fct_orders using (customer_id)",
                "description": "Customer dimension with order aggregates.",
                "config": {"materialized": "table", "tags": ["finance"]},
                "tags": ["finance"],
                "columns": {
                    "customer_id": {"name": "customer_id", "data_type": "integer", "description": "Primary key"},
                    "lifetime_value": {"name": "lifetime_value", "data_type": "numeric", "description": "Sum of orders"}
                },
                "depends_on": {
                    "nodes": [
                        "model.jaffle_shop.stg_customers",
                        "model.jaffle_shop.fct_orders"
                    ]
                }
            },
            "test.jaffle_shop.not_null_stg_orders_order_id": {
                "resource_type": "test",
                "name": "not_null_stg_orders_order_id",
                "test_metadata": {
                    "name": "not_null",
                    "kwargs": {"column_name": "order_id"}
                },
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.stg_orders"]}
            },
            "test.jaffle_shop.unique_stg_orders_order_id": {
                "resource_type": "test",
                "name": "unique_stg_orders_order_id",
                "test_metadata": {
                    "name": "unique",
                    "kwargs": {"column_name": "order_id"}
                },
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.stg_orders"]}
            },
            "test.jaffle_shop.relationships_fct_orders_customer_id": {
                "resource_type": "test",
                "name": "relationships_fct_orders_customer_id",
                "test_metadata": {
                    "name": "relationships",
                    "kwargs": {"column_name": "customer_id"}
                },
                "config": {"severity": "error"},
                "depends_on": {"nodes": ["model.jaffle_shop.fct_orders"]}
            }
        },
        "sources": {
            "source.jaffle_shop.ecom.orders": {
                "resource_type": "source",
                "name": "orders",
                "source_name": "ecom",
                "schema": "raw",
                "description": "Raw orders table.",
                "loader": "fivetran",
                "columns": {
                    "order_id": {"name": "order_id", "data_type": "integer", "description": ""}
                }
            },
            "source.jaffle_shop.ecom.customers": {
                "resource_type": "source",
                "name": "customers",
                "source_name": "ecom",
                "schema": "raw",
                "description": "Raw customers table.",
                "loader": "fivetran",
                "columns": {}
            },
            "source.jaffle_shop.ecom.payments": {
                "resource_type": "source",
                "name": "payments",
                "source_name": "ecom",
                "schema": "raw",
                "description": "Raw payments table.",
                "loader": "fivetran",
                "columns": {}
            }
        },
        "macros": {
            "macro.jaffle_shop.cents_to_dollars": {
                "resource_type": "macro",
                "name": "cents_to_dollars",
                "macro_sql": "{% macro cents_to_dollars(col) %}({{ col }} / 100.0){% endmacro %}",
                "description": "Converts a cents column to dollars.",
                "package_name": "jaffle_shop"
            }
        },
        "exposures": {},
        "parent_map": {
            "model.jaffle_shop.stg_orders": ["source.jaffle_shop.ecom.orders"],
            "model.jaffle_shop.stg_customers": ["source.jaffle_shop.ecom.customers"],
            "model.jaffle_shop.stg_payments": ["source.jaffle_shop.ecom.payments"],
            "model.jaffle_shop.fct_orders": [
                "model.jaffle_shop.stg_orders",
                "model.jaffle_shop.stg_payments"
            ],
            "model.jaffle_shop.dim_customers": [
                "model.jaffle_shop.stg_customers",
                "model.jaffle_shop.fct_orders"
            ],
            "test.jaffle_shop.not_null_stg_orders_order_id": ["model.jaffle_shop.stg_orders"],
            "test.jaffle_shop.unique_stg_orders_order_id": ["model.jaffle_shop.stg_orders"],
            "test.jaffle_shop.relationships_fct_orders_customer_id": ["model.jaffle_shop.fct_orders"]
        },
        "child_map": {}
    })
}

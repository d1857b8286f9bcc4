mod container_engine_tests;

mod serializer_tests;
